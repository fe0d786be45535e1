pub mod tracking_repository;
