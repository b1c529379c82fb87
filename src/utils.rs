mod increment_request_id;

pub use increment_request_id::increment_request_id;
