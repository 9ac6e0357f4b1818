pub mod int_comparator;
pub mod key_comparator;
