// Notion Client
//
// Implements the DocumentProvider trait from calsync-core against the Notion
// API. One client per tenant, authenticated with that tenant's integration
// token. The bound database must carry the properties named by NotionSchema.

mod client;
mod schema;

#[cfg(test)]
mod tests;

pub use client::{NotionClient, NOTION_API_BASE, NOTION_VERSION};
pub use schema::NotionSchema;

// Re-export core trait for convenience
pub use calsync_core::DocumentProvider;
