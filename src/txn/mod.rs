pub(crate) mod txn_structs;
pub(crate) mod txn_methods;
