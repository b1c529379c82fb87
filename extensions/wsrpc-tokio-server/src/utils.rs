mod ws_listener;

pub use ws_listener::{bind_ws_listener_on_random_port, listener_ws_url};
