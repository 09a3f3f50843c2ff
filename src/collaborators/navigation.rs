use parking_lot::Mutex;
use tracing::info;
use url::Url;

use crate::collaborators::{CollaboratorError, Navigator};

const DIRECTIONS_BASE_URL: &str = "https://www.google.com/maps/dir/?api=1";

/// Builds driving-directions deep links and remembers the one currently open,
/// so a client can pick it up and launch its map application.
#[derive(Default)]
pub struct MapsLinkNavigator {
    current: Mutex<Option<String>>,
}

impl MapsLinkNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_route(&self) -> Option<String> {
        self.current.lock().clone()
    }
}

impl Navigator for MapsLinkNavigator {
    fn open_route(&self, destination: &str, origin: Option<&str>) -> Result<(), CollaboratorError> {
        if destination.trim().is_empty() {
            return Err(CollaboratorError::Rejected(
                "destination cannot be empty".to_string(),
            ));
        }

        let url = directions_url(destination, origin)
            .map_err(|err| CollaboratorError::Rejected(format!("invalid directions link: {err}")))?;
        info!(url = %url, "navigation opened");
        *self.current.lock() = Some(url.into());
        Ok(())
    }

    fn dismiss(&self) {
        if self.current.lock().take().is_some() {
            info!("navigation dismissed");
        }
    }
}

pub fn directions_url(destination: &str, origin: Option<&str>) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(DIRECTIONS_BASE_URL)?;

    {
        let mut query_pairs = url.query_pairs_mut();
        if let Some(origin) = origin.map(str::trim).filter(|origin| !origin.is_empty()) {
            query_pairs.append_pair("origin", origin);
        }
        query_pairs.append_pair("destination", destination.trim());
        query_pairs.append_pair("travelmode", "driving");
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{directions_url, MapsLinkNavigator};
    use crate::collaborators::Navigator;

    #[test]
    fn directions_url_form_encodes_addresses() {
        let url = directions_url("12 Main St, Kandy", None).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.google.com/maps/dir/?api=1&destination=12+Main+St%2C+Kandy&travelmode=driving"
        );

        let url = directions_url(" Café ", None).unwrap();
        assert!(url.as_str().contains("destination=Caf%C3%A9&"));
    }

    #[test]
    fn directions_url_includes_origin_when_present() {
        let url = directions_url("Kandy", Some("Colombo")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.google.com/maps/dir/?api=1&origin=Colombo&destination=Kandy&travelmode=driving"
        );

        let url = directions_url("Kandy", Some("  ")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.google.com/maps/dir/?api=1&destination=Kandy&travelmode=driving"
        );

        let pairs: Vec<(String, String)> = directions_url("7.19,80.12", Some("Colombo"))
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect();
        assert!(pairs.contains(&("destination".to_string(), "7.19,80.12".to_string())));
    }

    #[test]
    fn dismiss_clears_the_open_route() {
        let navigator = MapsLinkNavigator::new();

        navigator.open_route("Galle Fort", None).unwrap();
        assert!(navigator.current_route().unwrap().contains("destination=Galle+Fort"));

        navigator.dismiss();
        assert!(navigator.current_route().is_none());
    }

    #[test]
    fn empty_destination_is_rejected() {
        let navigator = MapsLinkNavigator::new();
        assert!(navigator.open_route(" ", Some("Colombo")).is_err());
        assert!(navigator.current_route().is_none());
    }
}
