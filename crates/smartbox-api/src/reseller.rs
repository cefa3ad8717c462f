use url::Url;

use crate::error::Error;

const GENERIC_BASIC_AUTH: &str = "NTRiY2NiZmI0MWE5YTUxMTNmMDQ4OGQwOnZkaXZkaQ==";
const HAVERLAND_BASIC_AUTH: &str = "NTU2ZDc0MWI3OGUzYmU5YjU2NjA3NTQ4OnZkaXZkaQ==";

/// Known API selectors and their client credential.
const RESELLERS: &[(&str, &str)] = &[
    ("api", GENERIC_BASIC_AUTH),
    ("api-ehc", GENERIC_BASIC_AUTH),
    ("api-climastar", GENERIC_BASIC_AUTH),
    ("api-elnur", GENERIC_BASIC_AUTH),
    ("api-hjm", GENERIC_BASIC_AUTH),
    ("api-evconfort", GENERIC_BASIC_AUTH),
    ("api-haverland", HAVERLAND_BASIC_AUTH),
    ("api-lhz", GENERIC_BASIC_AUTH),
];

/// A reseller deployment of the Smartbox backend.
///
/// Determines the API host and the basic-auth client credential the
/// token endpoint expects. Each reseller runs its own host under
/// `{api_name}.helki.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reseller {
    api_name: String,
    basic_auth: &'static str,
}

impl Reseller {
    /// Look up a reseller by API selector.
    ///
    /// Unknown selectors keep their own host but borrow the generic
    /// client credential, which most white-label deployments accept.
    pub fn from_api_name(api_name: &str) -> Self {
        let basic_auth = RESELLERS
            .iter()
            .find(|(name, _)| *name == api_name)
            .map_or(GENERIC_BASIC_AUTH, |(_, auth)| *auth);

        Self {
            api_name: api_name.to_owned(),
            basic_auth,
        }
    }

    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    /// Value for the `Authorization: Basic ...` header on token grants.
    pub fn basic_auth(&self) -> &'static str {
        self.basic_auth
    }

    /// The reseller's API host, e.g. `https://api-hjm.helki.com`.
    pub fn api_host(&self) -> Result<Url, Error> {
        Url::parse(&format!("https://{}.helki.com", self.api_name)).map_err(Error::InvalidUrl)
    }
}

impl Default for Reseller {
    fn default() -> Self {
        Self::from_api_name("api")
    }
}
