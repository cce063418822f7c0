use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use gcp_oidc::{Config, HttpClient, IamCredentials, StsExchanger};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = Config::parse();

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = async {
        let client = HttpClient::new()?;
        let exchanger = StsExchanger::new(client.clone());
        let issuer = IamCredentials::new(client);
        gcp_oidc::run(&config, &exchanger, &issuer).await
    }
    .await;

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            let chain = std::iter::successors(Some(&err as &dyn std::error::Error), |err| {
                err.source()
            })
            .map(ToString::to_string)
            .collect::<Vec<_>>();
            error!("{}", chain.join(": "));
            ExitCode::FAILURE
        }
    }
}
