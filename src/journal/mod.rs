pub(crate) mod journal_structs;
pub(crate) mod journal_methods;
