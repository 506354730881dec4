use serde_json::json;

use crate::auth::{generate_jwt, Claims};
use crate::cli::OutputFormat;
use crate::config::AppConfig;

pub fn handle(config: &AppConfig, id: String, role: String, output_format: OutputFormat) -> anyhow::Result<()> {
    let claims = Claims::new(id, role, &config.security);
    let token = generate_jwt(&claims, &config.security)?;

    match output_format {
        OutputFormat::Json => {
            let response = json!({
                "access_token": token,
                "token_type": "Bearer",
                "expires_in": claims.expires_in(),
                "id": claims.sub,
                "role": claims.role,
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => println!("{}", token),
    }
    Ok(())
}
