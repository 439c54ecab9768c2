//! CLI commands for installing, toggling, updating and querying extensions.

use {
    anyhow::{Result, bail},
    hikari_common::now_ms,
    hikari_extensions::{ExtensionState, KindContext, SearchFilter},
    serde_json::json,
};

pub async fn catalog(ctx: &KindContext, json: bool) -> Result<()> {
    let catalogs = ctx.repos().fetch_all_extensions().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&catalogs)?);
        return Ok(());
    }
    if catalogs.is_empty() {
        println!("No reachable {} repositories.", ctx.kind());
        return Ok(());
    }

    for catalog in &catalogs {
        println!("{} ({})", catalog.name, catalog.url);
        for entry in &catalog.extensions {
            let installed = match ctx.store().get(&entry.id) {
                Some(record) if record.version == entry.version => " [installed]".to_string(),
                Some(record) => format!(" [installed {}]", record.version),
                None => String::new(),
            };
            let nsfw = if entry.nsfw {
                " [nsfw]"
            } else {
                ""
            };
            println!(
                "  {id} {version} — {name} ({lang}){nsfw}{installed}",
                id = entry.id,
                version = entry.version,
                name = entry.name,
                lang = entry.lang,
            );
        }
    }
    Ok(())
}

pub async fn install(ctx: &KindContext, repo: &str, id: &str) -> Result<()> {
    let outcome = ctx.install(repo, id).await?;
    println!(
        "Installed {} {} ({}).",
        outcome.record.id,
        outcome.record.version,
        ctx.kind()
    );
    if let Some(error) = outcome.load_error {
        eprintln!("  ↳ failed to load: {error}");
        std::process::exit(1);
    }
    Ok(())
}

pub async fn uninstall(ctx: &KindContext, id: &str) -> Result<()> {
    if !ctx.uninstall(id).await? {
        bail!("{} extension '{id}' is not installed", ctx.kind());
    }
    println!("Uninstalled {id}.");
    Ok(())
}

pub async fn set_enabled(ctx: &KindContext, id: &str, enabled: bool) -> Result<()> {
    let found = if enabled {
        ctx.enable(id).await?
    } else {
        ctx.disable(id).await?
    };
    if !found {
        bail!("{} extension '{id}' is not installed", ctx.kind());
    }
    report_state(ctx, id, enabled).await;
    Ok(())
}

pub async fn toggle(ctx: &KindContext, id: &str) -> Result<()> {
    let Some(enabled) = ctx.toggle(id).await? else {
        bail!("{} extension '{id}' is not installed", ctx.kind());
    };
    report_state(ctx, id, enabled).await;
    Ok(())
}

async fn report_state(ctx: &KindContext, id: &str, enabled: bool) {
    if !enabled {
        println!("Disabled {id}.");
        return;
    }
    match ctx.state(id).await {
        ExtensionState::Failed(error) => println!("Enabled {id}, but it failed to load: {error}"),
        _ => println!("Enabled {id}."),
    }
}

pub async fn list(ctx: &KindContext, json: bool) -> Result<()> {
    let records = ctx.store().get_all();

    if json {
        let mut entries = Vec::with_capacity(records.len());
        for record in &records {
            entries.push(json!({
                "id": record.id,
                "name": record.name,
                "version": record.version,
                "lang": record.lang,
                "nsfw": record.nsfw,
                "repoUrl": record.repo_url,
                "enabled": record.enabled,
                "installedAt": record.installed_at,
                "load": ctx.state(&record.id).await,
            }));
        }
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} extensions installed.", ctx.kind());
        return Ok(());
    }

    let now = now_ms();
    for record in &records {
        let status = match ctx.state(&record.id).await {
            ExtensionState::Loaded => "✓",
            ExtensionState::Failed(_) => "✗",
            ExtensionState::Unloaded => "·",
        };
        println!(
            "  {status} {id} {version} — {name} ({lang}) installed {age}",
            id = record.id,
            version = record.version,
            name = record.name,
            lang = record.lang,
            age = format_age(now.saturating_sub(record.installed_at)),
        );
        if !record.enabled {
            println!("    ↳ disabled");
        } else if let Some(error) = ctx.load_error(&record.id).await {
            println!("    ↳ {error}");
        }
    }
    Ok(())
}

pub async fn sources(ctx: &KindContext, lang: Option<&str>) -> Result<()> {
    let sources = match lang {
        Some(lang) => ctx.get_sources_by_lang(lang).await,
        None => ctx.get_all_sources().await,
    };
    if sources.is_empty() {
        println!("No {} sources available.", ctx.kind());
        return Ok(());
    }

    for source in &sources {
        let info = source.info();
        let origin = if ctx.is_builtin(&info.id).await {
            "built-in"
        } else {
            "extension"
        };
        println!(
            "  {} — {} ({}) [{origin}]",
            info.id, info.name, info.lang
        );
    }
    Ok(())
}

pub async fn updates(ctx: &KindContext) -> Result<()> {
    let updates = ctx.check_updates().await;
    if updates.is_empty() {
        println!("All {} extensions are up to date.", ctx.kind());
        return Ok(());
    }
    for update in &updates {
        println!(
            "  {} {} → {} ({})",
            update.id, update.installed, update.available, update.repo_url
        );
    }
    Ok(())
}

pub async fn update(ctx: &KindContext, id: &str) -> Result<()> {
    match ctx.update(id).await? {
        Some(applied) => {
            println!("Updated {} {} → {}.", applied.id, applied.installed, applied.available);
            if let Some(error) = ctx.load_error(id).await {
                eprintln!("  ↳ failed to load: {error}");
                std::process::exit(1);
            }
        },
        None => println!("{id} is already up to date."),
    }
    Ok(())
}

pub async fn search(ctx: &KindContext, source_id: &str, query: &str, page: u32) -> Result<()> {
    let Some(source) = ctx.get_source(source_id).await else {
        if let Some(error) = ctx.load_error(source_id).await {
            bail!("source '{source_id}' failed to load: {error}");
        }
        bail!("no {} source '{source_id}'", ctx.kind());
    };

    let results = source
        .search(&SearchFilter::new(query).page(page))
        .await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn format_age(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..60 => "just now".to_string(),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
