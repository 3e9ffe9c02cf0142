pub mod device_structs;
pub mod device_methods;
