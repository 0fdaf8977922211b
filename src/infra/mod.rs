pub mod fs_store;
pub mod http_client;
pub mod mock_feed;
