// Google Calendar Client
//
// Implements the CalendarProvider trait from calsync-core against the Google
// Calendar v3 API. One client per tenant: it carries that tenant's access and
// refresh tokens plus the callback URL its grant was issued for.

mod callback;
mod client;
mod types;

#[cfg(test)]
mod tests;

pub use callback::{CallbackUrls, CallbackUrlsError};
pub use client::{GoogleCalendarClient, GoogleCredentials, GOOGLE_CALENDAR_API_BASE, GOOGLE_TOKEN_URL};
pub use types::{CalendarListEntry, EventBody, EventDateTime, GoogleEvent};

// Re-export core trait for convenience
pub use calsync_core::CalendarProvider;
