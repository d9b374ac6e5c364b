//! HTTP management API.
//!
//! Clients drive the record lifecycle over JSON: `POST /v1/domain` allocates
//! a random FQDN and returns the renewal token, and every later call
//! presents that token in the `Authorization` header to read, replace,
//! renew or release the records under the FQDN.
//!
//! ```bash
//! ❯ curl -X POST --json '{"hosts":["1.1.1.1"]}' http://localhost:3000/v1/domain
//! {"status":200,"token":"...","data":{"fqdn":"k4x92a.lb.example","hosts":["1.1.1.1"],"expiration":...}}
//! ```

mod api_error;
mod model;
mod routes;
pub mod server;

pub use server::new;
