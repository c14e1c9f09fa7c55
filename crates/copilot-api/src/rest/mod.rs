pub mod handlers;
mod router;
mod ws_route;

pub use router::create_router;
