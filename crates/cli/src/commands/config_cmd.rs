//! `ctxprompt init|config`: Configuration management commands.

use ctxprompt_config::{AppConfig, ModeConfig, StoreConfig};

use super::CmdResult;

const REDACTED: &str = "***";

pub async fn init(force: bool) -> CmdResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() && !force {
        println!("  Config already exists: {}", config_path.display());
        println!("  Use --force to overwrite.");
        return Ok(());
    }

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", config_path.display());
    println!();
    println!("  Next: set CTXPROMPT_API_KEY (or OPENAI_API_KEY), then try");
    println!("    ctxprompt add \"some context\"");
    println!("    ctxprompt ask \"a question\"");
    Ok(())
}

pub async fn validate() -> CmdResult {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            if !config.has_api_key() {
                println!();
                println!("   ⚠️  No API key set (set CTXPROMPT_API_KEY or OPENAI_API_KEY)");
            }

            println!();
            println!("   Base URL:   {}", config.base_url);
            println!("   Chat:       {}", config.chat_model);
            println!("   Embeddings: {}", config.embedding_model);
            match &config.mode {
                ModeConfig::Classic => println!("   Mode:       classic"),
                ModeConfig::AssistantRun { assistant_id } => {
                    println!("   Mode:       assistant_run ({assistant_id})")
                }
            }
            match &config.store {
                StoreConfig::InMemory => println!("   Store:      in_memory"),
                StoreConfig::Postgres(pg) => println!(
                    "   Store:      postgres {}:{}/{} table {}",
                    pg.host, pg.port, pg.database, pg.table
                ),
            }
            println!(
                "   Context:    {} tokens x {} safety, {} pairs max",
                config.context.token_cap, config.context.safety_factor, config.context.history_cap
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> CmdResult {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> CmdResult {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    if let StoreConfig::Postgres(pg) = &mut config.store
        && pg.password.is_some()
    {
        pg.password = Some(REDACTED.into());
    }
    config
}
