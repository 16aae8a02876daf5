//! CLI tool for seeding the SQLite directory and list repository
//!
//! # Usage
//!
//! ```bash
//! ingest-admin add-user bob bob@example.org --db sqlite://ingest.db
//! ingest-admin add-org acme
//! ingest-admin add-org-member acme bob
//! ingest-admin add-list --user bob announce --policy user
//! ingest-admin add-list --org acme staff --policy owner
//! ingest-admin add-member --user bob announce alice
//! ingest-admin archive-list --user bob announce
//! ```

use clap::{Args, Parser, Subcommand};
use ingest_rs::repository::{Directory, ListRepository, SenderPolicy, SqliteRepository};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ingest-admin")]
#[command(about = "Manage users, organizations and lists", long_about = None)]
struct Cli {
    /// Database URL (e.g., sqlite://ingest.db?mode=rwc)
    #[arg(short, long, default_value = "sqlite://ingest.db?mode=rwc")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

/// Owner of a list: exactly one of `--user` or `--org`
#[derive(Args)]
#[group(required = true, multiple = false)]
struct Owner {
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    org: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user
    AddUser {
        name: String,
        email: String,
        /// Register the account as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Register an organization
    AddOrg { name: String },
    /// Add a user to an organization
    AddOrgMember { org: String, user: String },
    /// Create a list
    AddList {
        #[command(flatten)]
        owner: Owner,
        name: String,
        /// owner, member or user
        #[arg(long, default_value = "member")]
        policy: String,
    },
    /// Record a user as list member
    AddMember {
        #[command(flatten)]
        owner: Owner,
        list: String,
        user: String,
    },
    /// Archive a list; mail to it is refused from then on
    ArchiveList {
        #[command(flatten)]
        owner: Owner,
        name: String,
    },
}

async fn owner_id(repo: &SqliteRepository, owner: &Owner) -> anyhow::Result<Uuid> {
    match (&owner.user, &owner.org) {
        (Some(user), _) => Ok(repo.user_by_name(user).await?.id),
        (None, Some(org)) => Ok(repo.org_by_name(org).await?.id),
        (None, None) => anyhow::bail!("either --user or --org is required"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let repo = SqliteRepository::new(&cli.db).await?;

    match cli.command {
        Commands::AddUser {
            name,
            email,
            inactive,
        } => {
            let user = repo.add_user(&name, &email, !inactive).await?;
            println!("✓ User {} <{}> added ({})", user.name, user.email, user.id);
        }
        Commands::AddOrg { name } => {
            let org = repo.add_org(&name).await?;
            println!("✓ Organization {} added ({})", org.name, org.id);
        }
        Commands::AddOrgMember { org, user } => {
            let org = repo.org_by_name(&org).await?;
            let user = repo.user_by_name(&user).await?;
            repo.add_org_member(org.id, user.id).await?;
            println!("✓ {} is now a member of {}", user.name, org.name);
        }
        Commands::AddList {
            owner,
            name,
            policy,
        } => {
            policy
                .parse::<SenderPolicy>()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            let owner_id = owner_id(&repo, &owner).await?;
            let list = repo.add_list(owner_id, &name, &policy).await?;
            println!("✓ List {} added ({})", list.name, list.id);
        }
        Commands::AddMember { owner, list, user } => {
            let owner_id = owner_id(&repo, &owner).await?;
            let list = repo.get_list(owner_id, &list).await?;
            let user = repo.user_by_name(&user).await?;
            repo.add_list_member(list.id, user.id).await?;
            println!("✓ {} is now a member of {}", user.name, list.name);
        }
        Commands::ArchiveList { owner, name } => {
            let owner_id = owner_id(&repo, &owner).await?;
            let list = repo.get_list(owner_id, &name).await?;
            repo.archive_list(list.id).await?;
            println!("✓ List {} archived", list.name);
        }
    }

    Ok(())
}
