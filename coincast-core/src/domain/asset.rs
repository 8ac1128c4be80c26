use serde::{Deserialize, Serialize};

use super::AssetId;

/// Identity and static metadata for one tracked asset.
///
/// Written only by the master sync stage. Never deleted: daily metrics and
/// predictions keep referring to it after it drops out of the top-N.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: AssetId,
    pub symbol: String,
    pub display_name: String,
    /// Market-cap rank at the last master sync.
    pub rank: Option<u32>,
    /// Upstream image URL.
    pub image_ref: Option<String>,
}

impl AssetRecord {
    /// Numeric image id and file name embedded in a CoinGecko image URL
    /// (`.../coins/images/{id}/large/{file}?{query}`).
    pub fn image_parts(&self) -> Option<(u64, String)> {
        let url = self.image_ref.as_deref()?;
        let parts: Vec<&str> = url.split('/').collect();
        let idx = parts.iter().position(|p| *p == "images")?;
        let id = parts.get(idx + 1)?.parse::<u64>().ok()?;
        let file = parts.last()?.split('?').next()?.to_string();
        if file.is_empty() {
            return None;
        }
        Some((id, file))
    }
}
