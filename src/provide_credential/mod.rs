//! The credential providers, one per source.

mod assume_role;
pub use assume_role::AssumeRoleCredentialProvider;

mod default;
pub use default::DefaultCredentialProvider;

mod ecs;
pub use ecs::EcsCredentialProvider;

mod env;
pub use env::EnvCredentialProvider;

mod imds;
pub use imds::ImdsCredentialProvider;

mod profile;
pub use profile::ProfileCredentialProvider;

mod web_identity;
pub use web_identity::WebIdentityCredentialProvider;

pub(crate) mod utils;
