pub mod pixel_server;
