pub use super::alias::Entity as AliasEntity;
pub use super::deployment::Entity as DeploymentEntity;
pub use super::domain::Entity as DomainEntity;
pub use super::project::Entity as ProjectEntity;
