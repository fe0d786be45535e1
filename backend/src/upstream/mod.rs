pub mod preprocess_service;
