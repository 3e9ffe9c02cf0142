pub mod fs;
mod conversions;
