pub mod checkout;
pub mod generate;

pub use checkout::ensure_branch;
pub use generate::generate;
