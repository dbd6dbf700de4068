use sphere_bucket::api;
use sphere_bucket::config::AppConfig;

#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("⚠️ Could not load .env: {}", err);
        }
    }

    env_logger::init();

    let app_config = AppConfig::from_env();
    let api_config = app_config.api.clone();
    let bucket_settings = app_config.bucket.clone();

    println!("🚀 Sphere bucket service starting...");
    api::start_api_server(api_config, bucket_settings).await;
}
