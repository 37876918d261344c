mod discord;
mod helpers;
mod status_and_claim;
mod twitter;
