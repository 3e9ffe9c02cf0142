pub mod hex_view;
pub mod path;
