//! Mock Interaction Server
//!
//! A request-matching mock HTTP server for end-to-end tests. Tests declare
//! interactions (expected request → canned response), point the system under
//! test at the server, and every request is answered with the matching
//! response or a 404.
//!
//! # Features
//!
//! - **Signature Matching**: Requests resolve by host + path + query string
//! - **Query Variants**: Same path, different query parameters, different responses
//! - **Catch-all Routes**: Interactions without query parameters answer any query
//! - **Path Templates**: `/users/{id}` and `/users/:id` segments
//! - **Live Registration**: Interactions added while running apply immediately
//!
//! # Example Configuration
//!
//! ```yaml
//! port: 9393
//! host: mock-service.test
//! interactions:
//!   - request:
//!       method: GET
//!       path: /api/users
//!       queryParams:
//!         id: 1
//!     response:
//!       status: 200
//!       body: "user 1"
//! ```

pub mod config;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod server;

pub use config::{
    HttpMethod, Interaction, MockServerConfig, QueryParams, QuerySignature, RequestDescriptor,
    ResponseDescriptor, Settings, UnmatchedQuery,
};
pub use error::MockError;
pub use matcher::Signature;
pub use registry::{Registry, Resolution};
pub use server::{MockServer, RequestStats};
