use crate::project::Project;
use colored::Colorize;
use terraflow_core::ResourceAddress;

pub async fn list(project: &Project) -> anyhow::Result<()> {
    let snapshot = project.store().snapshot().await?;
    if snapshot.is_empty() {
        println!("{}", "管理しているリソースはありません".yellow());
        return Ok(());
    }

    for (address, entry) in snapshot.iter() {
        let deposed = if entry.deposed.is_empty() {
            String::new()
        } else {
            format!(" ({}個の旧オブジェクトが削除待ち)", entry.deposed.len())
                .yellow()
                .to_string()
        };
        println!("{}  {}{}", address.to_string().cyan(), entry.id, deposed);
    }
    println!();
    println!("serial: {}", snapshot.serial);
    Ok(())
}

pub async fn show(project: &Project, address: &str) -> anyhow::Result<()> {
    let address: ResourceAddress = address
        .parse()
        .map_err(|e| anyhow::anyhow!("不正なアドレスです: {}", e))?;

    let Some(entry) = project.store().get(&address).await? else {
        anyhow::bail!("{} は state に存在しません", address);
    };

    println!("{}", address.to_string().cyan().bold());
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}
