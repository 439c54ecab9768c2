//! CLI commands for repository management.

use {anyhow::Result, clap::Subcommand, hikari_extensions::KindContext};

#[derive(Subcommand)]
pub enum RepoAction {
    /// Add a repository by the URL of its index.
    Add { url: String },
    /// Remove a repository. Installed extensions stay installed.
    Remove { url: String },
    /// List added repositories.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_repo(ctx: &KindContext, action: RepoAction) -> Result<()> {
    let kind = ctx.kind();
    match action {
        RepoAction::Add { url } => {
            let catalog = ctx.repos().add_repo(&url).await?;
            println!(
                "Added {kind} repository '{}' ({} extension(s)).",
                catalog.name,
                catalog.extensions.len()
            );
        },
        RepoAction::Remove { url } => {
            if ctx.repos().remove_repo(&url)? {
                println!("Removed {kind} repository {url}.");
            } else {
                eprintln!("No {kind} repository {url}.");
                std::process::exit(1);
            }
        },
        RepoAction::List { json } => {
            let repos = ctx.repos().get_repos();
            if json {
                println!("{}", serde_json::to_string_pretty(&repos)?);
            } else if repos.is_empty() {
                println!("No {kind} repositories. Add one with `hikari repo add <url>`.");
            } else {
                for repo in &repos {
                    println!("  {} — {}", repo.display_name, repo.url);
                }
            }
        },
    }

    Ok(())
}
