// Calsync core
//
// Shared vocabulary of the sync fleet: domain entities, the tagged sync error,
// upstream provider traits and telemetry bootstrap.
//
// Key design decisions:
// - Reconciliation never sees a concrete HTTP client, only CalendarProvider/DocumentProvider
// - SyncError is one struct with an origin discriminant; ErrorKind is the taxonomy
// - Tenant claims are lease columns on Tenant (claimed_by, claimed_until)

pub mod error;
pub mod event_link;
pub mod fleet;
pub mod telemetry;
pub mod tenant;
pub mod traits;

pub use error::{
    ClientError, ErrorKind, ErrorOrigin, LogRecord, Remediation, Result, Severity, SourceSystem,
    SyncError,
};
pub use event_link::{EventLink, NewEventLink};
pub use fleet::{FleetInstance, RegisterInstance, PREFIX_HEADER, SECRET_HEADER};
pub use tenant::{Calendar, CalendarStatus, PlanTier, Tenant};
pub use traits::{
    AccessRole, CalendarEvent, CalendarInfo, CalendarProvider, ClientResult, DatabaseInfo,
    DocumentPage, DocumentProvider, EventDraft, PageDraft, ProviderFactory, TimeWindow,
};
