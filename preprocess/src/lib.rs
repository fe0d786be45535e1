pub mod routes;
pub mod transform;
