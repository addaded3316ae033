use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pow_ledger::blockchain::{self, Blockchain};
use pow_ledger::config::load_config;

mod api;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_chain_tip,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::get_wallet_balance,
        api::handlers::get_info
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::WalletResponse,
            api::handlers::BalanceResponse,
            api::handlers::InfoResponse
        )
    ),
    tags(
        (name = "ledger", description = "Proof-of-work ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "0.1.0",
        description = "A single-node proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = load_config().map_err(|err| {
        error!("{}", err);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
    })?;

    let blockchain = Blockchain::with_config(config.ledger.clone()).map_err(|err| {
        error!("{}", err);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
    })?;
    let blockchain = web::Data::new(blockchain);

    info!(
        "Reward per block {}, difficulty {}",
        config.ledger.reward, config.ledger.difficulty
    );
    info!(
        "Starting HTTP server at http://{}:{}",
        config.server.host, config.server.port
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
