//! Law-office record keeping over a single SQLite file: clients, cases,
//! appointments, invoices and the documents shelf, plus the maintenance
//! tooling that keeps the uploads directory honest.
//!
//! The binary wires this together as an HTTP server (`lawdesk serve`) and a
//! maintenance CLI (`lawdesk db …`, `lawdesk files …`).

pub mod db;
pub mod error;
pub mod http;
pub mod id;
pub mod logging;
pub mod model;
pub mod paths;
pub mod reports;
pub mod state;
pub mod store;
pub mod time;
pub mod uploads;

pub use error::{AppError, AppResult};
pub use state::AppState;
