use sqlx::PgPool;
use std::sync::Arc;
use timekeep_db::{
    DirectoryRepository, InMemoryStore, InvitationRepository, PgDirectoryRepository,
    PgInvitationRepository, PgProjectRepository, PgTimeEntryRepository, ProjectRepository,
    TimeEntryRepository,
};

/// Repository handles shared by every service.
#[derive(Clone)]
pub struct Repositories {
    pub directory: Arc<dyn DirectoryRepository>,
    pub projects: Arc<dyn ProjectRepository>,
    pub entries: Arc<dyn TimeEntryRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            directory: Arc::new(PgDirectoryRepository::new(pool.clone())),
            projects: Arc::new(PgProjectRepository::new(pool.clone())),
            entries: Arc::new(PgTimeEntryRepository::new(pool.clone())),
            invitations: Arc::new(PgInvitationRepository::new(pool)),
        }
    }

    pub fn in_memory(store: InMemoryStore) -> Self {
        Self {
            directory: Arc::new(store.clone()),
            projects: Arc::new(store.clone()),
            entries: Arc::new(store.clone()),
            invitations: Arc::new(store),
        }
    }
}
