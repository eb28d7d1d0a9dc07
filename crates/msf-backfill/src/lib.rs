pub mod attribute;
pub mod column;
pub mod finder;
pub mod job;
pub mod probe;
pub mod scheduler;
pub mod service;

use msf_core::{
    AttributeStore, Clock, FileResolver, HostError, ItemCatalog, TicketStore, TransientCache,
};
use thiserror::Error;

pub use attribute::DerivedAttributeStore;
pub use column::{CellSize, ColumnCell};
pub use finder::ItemFinder;
pub use job::{BackfillJob, BackfillReport, ErrorLog, ItemError, ItemErrorKind, JobState};
pub use probe::{Probe, SizeProbe, SizeSource};
pub use scheduler::{JobHook, JobScheduler, ScheduleOutcome};
pub use service::{BulkReport, Dispatch, MediaFilesize, ProgressSnapshot, RecomputeOutcome};

#[derive(Debug, Error)]
pub enum FilesizeError {
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Handles to every host collaborator, passed explicitly instead of living in globals.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub catalog: &'a dyn ItemCatalog,
    pub attributes: &'a dyn AttributeStore,
    pub files: &'a dyn FileResolver,
    pub cache: &'a dyn TransientCache,
    pub tickets: &'a dyn TicketStore,
    pub clock: &'a dyn Clock,
}

impl<'a> Collaborators<'a> {
    /// For hosts that implement every port on one type.
    pub fn from_host<H>(host: &'a H, clock: &'a dyn Clock) -> Self
    where
        H: ItemCatalog + AttributeStore + FileResolver + TransientCache + TicketStore,
    {
        Self {
            catalog: host,
            attributes: host,
            files: host,
            cache: host,
            tickets: host,
            clock,
        }
    }

    pub fn with_files(mut self, files: &'a dyn FileResolver) -> Self {
        self.files = files;
        self
    }
}
