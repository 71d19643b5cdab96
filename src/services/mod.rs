pub mod checksum;
pub mod fixity;
pub mod notify;
pub mod restore;
pub mod validation;
