pub mod badge_users;
pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod error_handling;
pub mod expiry;
pub mod oauth;
pub mod routes;
pub mod startup;
pub mod telegram;
pub mod telemetry;
