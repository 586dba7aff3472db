// Provisioning commands
pub mod provision;
