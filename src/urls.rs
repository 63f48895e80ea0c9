use url::Url;

pub const BUST_PARAM: &str = "v";

pub fn image_url(base: &str, study_id: &str, slice_number: usize) -> String {
    format!("{}/images/{}/{}.png", base.trim_end_matches('/'), study_id, slice_number)
}

pub fn overlay_url(base: &str, study_id: &str, slice_number: usize) -> String {
    format!(
        "{}/images/{}/{}/overlay.png",
        base.trim_end_matches('/'),
        study_id,
        slice_number
    )
}

/// Sets the `v` query parameter of `url` to `token`, replacing a previous
/// token if present. Other parameters keep their order. Unparseable URLs
/// are returned as given.
pub fn cache_bust(url: &str, token: u64) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let kept = pairs_without_bust(&parsed);
    {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        query.append_pair(BUST_PARAM, &token.to_string());
    }
    parsed.into()
}

pub fn bust_token(url: &str) -> Option<u64> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| *k == BUST_PARAM)
        .and_then(|(_, v)| v.parse().ok())
}

pub fn strip_bust(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let kept = pairs_without_bust(&parsed);
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
    }
    parsed.into()
}

fn pairs_without_bust(url: &Url) -> Vec<(String, String)> {
    url.query_pairs()
        .filter(|(k, _)| *k != BUST_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
