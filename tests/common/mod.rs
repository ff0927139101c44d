use anyhow::Result;
use opendal::services::Memory;
use opendal::Operator;

#[allow(dead_code)]
pub fn setup_operator() -> Result<Operator> {
    let builder = Memory::default();
    let op = Operator::new(builder)?.finish();
    Ok(op)
}

#[allow(dead_code)]
pub async fn setup_workspace(op: &Operator, name: &str) -> Result<String> {
    let ws_path = format!("workspaces/{}", name);
    kiroku_core::workspace::create_workspace(op, &ws_path, name).await?;
    Ok(ws_path)
}
