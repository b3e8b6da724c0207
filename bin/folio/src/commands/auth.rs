use folio_core::Error;
use folio_storage::{AuthStatus, CredentialStore};

use super::Context;

pub async fn setup(ctx: &Context) -> anyhow::Result<()> {
    if !ctx.json {
        println!("A browser window will open. Sign in to your Google account there;");
        println!("this command finishes on its own once the notebook list appears.");
    }
    let status = ctx.pilot().login().await?;
    print_status(&status, ctx.json)?;
    Ok(())
}

pub fn status(ctx: &Context) -> anyhow::Result<()> {
    let status = ctx.credentials().status();
    print_status(&status, ctx.json)?;
    if !status.authenticated {
        return Err(Error::NotAuthenticated("no usable stored session".into()).into());
    }
    Ok(())
}

pub fn clear(ctx: &Context) -> anyhow::Result<()> {
    ctx.credentials().clear()?;
    if ctx.json {
        println!("{}", serde_json::json!({"cleared": true}));
    } else {
        println!("Stored session removed. Run `folio auth setup` to sign in again.");
    }
    Ok(())
}

fn print_status(status: &AuthStatus, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }
    if status.authenticated {
        println!("✓ Authenticated ({} cookies)", status.cookie_count);
    } else {
        println!("✗ Not authenticated. Run `folio auth setup`.");
    }
    if let Some(at) = status.updated_at {
        println!("  Last sign-in: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}
