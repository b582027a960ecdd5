pub mod app_config;
pub mod database;
pub mod delay_repo;

pub use database::DbClient;
pub use delay_repo::PgDelayRepository;
