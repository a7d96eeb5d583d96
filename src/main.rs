use log::{error, info};

#[actix_rt::main]
async fn main() {
    let env = env_logger::Env::default().filter_or("RUST_LOG", "info");
    env_logger::Builder::from_env(env).init();

    let server = match globe::app::init() {
        Ok(server) => server,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = server.await {
        error!("server stopped with an error: {}", e);
        std::process::exit(1);
    }
    info!("server stopped; database pool released");
}
