//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod action_repo;
pub mod catalog_repo;
pub mod dependency_repo;
pub mod dispatcher;
pub mod event_bus;
pub mod settings_repo;

pub use action_repo::ActionRepository;
pub use catalog_repo::CatalogRepository;
pub use dependency_repo::DependencyRepository;
pub use dispatcher::ActionDispatcher;
pub use event_bus::EventPublisher;
pub use settings_repo::SettingsRepository;

/// Everything the queue services need from persistence.
pub trait QueueStore:
    ActionRepository + CatalogRepository + DependencyRepository + SettingsRepository
{
}

impl<T> QueueStore for T where
    T: ActionRepository + CatalogRepository + DependencyRepository + SettingsRepository
{
}
