pub(crate) mod cache_structs;
pub(crate) mod cache_methods;
