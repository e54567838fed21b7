//! Client for the PNCP public consultation API (Portal Nacional de
//! Contratações Públicas).

pub mod client;
pub mod config;
pub mod raw;

pub use client::{PageQuery, PncpClient, PncpError, ProcurementSource, UpstreamPage};
pub use config::PncpConfig;
pub use raw::RawProcurement;
