use crate::models::{ProductItem, Recommendations};

const SEARCH_ROOT: &str = "https://www.amazon.com/s";
const PARTNER_TAG: &str = "aiconstructio-20";

/// Marketplace search link for a product name, carrying the partner tag.
///
/// Spaces become `+` (search-box convention); everything else is
/// percent-encoded, so any input yields a usable URL.
pub fn build_link(product_name: &str) -> String {
    let encoded = urlencoding::encode(product_name).replace("%20", "+");
    format!("{SEARCH_ROOT}?k={encoded}&tag={PARTNER_TAG}")
}

/// Fills in `affiliate_url` on every item that has none (or a blank one).
pub fn attach_links(recommendations: &mut Recommendations) {
    for item in recommendations
        .materials
        .iter_mut()
        .chain(recommendations.tools.iter_mut())
    {
        attach_link(item);
    }
}

pub fn attach_link(item: &mut ProductItem) {
    let missing = item
        .affiliate_url
        .as_deref()
        .map(|url| url.trim().is_empty())
        .unwrap_or(true);
    if missing {
        item.affiliate_url = Some(build_link(&item.name));
    }
}
