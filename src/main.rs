mod app;
mod config;
mod helpers;
mod local_logger;
mod prelude;
mod process;
mod scope;
mod session;
mod supervisor;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let res = app::run();
    if let Err(err) = res {
        local_logger::clean_logger();
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
