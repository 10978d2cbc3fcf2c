pub mod provisioning;
pub mod workers;
