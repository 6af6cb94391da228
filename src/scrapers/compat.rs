//! Part/model compatibility lookup
//!
//! The vendor exposes a JSON endpoint that answers whether one part fits one
//! model. It is hit as a side request, so the session ends up where it was.

use crate::config::SiteConfig;
use crate::scrapers::ScrapeError;
use crate::session::Session;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

const MATCH: &str = "MODEL_PARTSKU_MATCH";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompatibilityResponse {
    #[serde(default)]
    compatibility_check_result: Option<String>,
}

/// Endpoint URL for one part/model pair
///
/// `part_id` must carry the catalog prefix; the endpoint takes the bare number.
pub fn compatibility_url(
    site: &SiteConfig,
    part_id: &str,
    model_id: &str,
) -> Result<String, ScrapeError> {
    let part_id = part_id.trim();
    let model_id = model_id.trim();
    let inventory_id = part_id
        .strip_prefix(site.part_id_prefix.as_str())
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| {
            ScrapeError::InvalidArgument(format!(
                "part id '{}' must start with '{}'",
                part_id, site.part_id_prefix
            ))
        })?;
    if model_id.is_empty() {
        return Err(ScrapeError::InvalidArgument("empty model id".to_string()));
    }

    let mut url = Url::parse(&site.compatibility_url).map_err(|e| {
        ScrapeError::InvalidArgument(format!(
            "bad compatibility url {}: {}",
            site.compatibility_url, e
        ))
    })?;
    url.query_pairs_mut()
        .append_pair("modelnumber", model_id)
        .append_pair("inventoryid", inventory_id)
        .append_pair("partdescription", "undefined");
    Ok(url.to_string())
}

/// True if the vendor reports `part_id` as fitting `model_id`
pub async fn check_compatibility(
    session: &mut Session,
    site: &SiteConfig,
    part_id: &str,
    model_id: &str,
) -> Result<bool, ScrapeError> {
    let url = compatibility_url(site, part_id, model_id)?;
    debug!("Compatibility request {}", url);

    let body = session.side_request(&url).await?;
    let response: CompatibilityResponse = serde_json::from_str(body.trim())?;
    let compatible = response.compatibility_check_result.as_deref() == Some(MATCH);
    info!(
        "Part {} {} model {}",
        part_id.trim(),
        if compatible { "fits" } else { "does not fit" },
        model_id.trim()
    );
    Ok(compatible)
}
