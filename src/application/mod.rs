pub mod bootstrap;
pub mod commands;
pub mod integrations;
pub mod ledger;
pub mod oauth;
pub mod reconcile;
pub mod scheduler;
