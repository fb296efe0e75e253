//! Name and UUID lookups

use crate::api::{Entity, PrismApi};
use crate::error::{CloudError, Result};
use crate::kind::ResourceKind;
use tracing::debug;
use uuid::Uuid;

/// How the caller refers to a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Name(String),
}

impl Selector {
    /// UUID-shaped input is an id, anything else a name.
    pub fn parse(input: &str) -> Self {
        if Uuid::parse_str(input).is_ok() {
            Selector::Id(input.to_string())
        } else {
            Selector::Name(input.to_string())
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "id {}", id),
            Selector::Name(name) => write!(f, "name {:?}", name),
        }
    }
}

/// Turn a selector into a UUID.
///
/// An id is returned without a round trip. A name must match exactly one
/// resource of `kind`.
pub async fn resolve(api: &dyn PrismApi, kind: ResourceKind, selector: &Selector) -> Result<String> {
    match selector {
        Selector::Id(id) => Ok(id.clone()),
        Selector::Name(name) => Ok(find_by_name(api, kind, name).await?.uuid),
    }
}

/// Fetch the resource a selector points at.
pub async fn resolve_entity(
    api: &dyn PrismApi,
    kind: ResourceKind,
    selector: &Selector,
) -> Result<Entity> {
    match selector {
        Selector::Id(id) => api
            .get(kind, id)
            .await
            .map_err(|e| CloudError::from_api(id, e)),
        Selector::Name(name) => find_by_name(api, kind, name).await,
    }
}

/// Every resource of `kind` whose name is exactly `name`.
pub(crate) async fn named(api: &dyn PrismApi, kind: ResourceKind, name: &str) -> Result<Vec<Entity>> {
    let listed = api.list_filtered(kind, &name_filter(name)).await?;
    let total = listed.len();

    // the server filter is looser than equality
    let matches: Vec<Entity> = listed
        .into_iter()
        .filter(|e| e.name.as_deref() == Some(name))
        .collect();
    debug!(kind = %kind, name, listed = total, exact = matches.len(), "resolved name");
    Ok(matches)
}

async fn find_by_name(api: &dyn PrismApi, kind: ResourceKind, name: &str) -> Result<Entity> {
    let mut matches = named(api, kind, name).await?;
    match matches.len() {
        0 => Err(CloudError::NotFound(format!("{} named {:?}", kind, name))),
        1 => Ok(matches.remove(0)),
        count => Err(CloudError::AmbiguousName {
            kind,
            name: name.to_string(),
            count,
        }),
    }
}

/// FIQL `name==` filter. `,` and `;` join clauses, so they are
/// percent-encoded along with `%` itself.
pub fn name_filter(name: &str) -> String {
    let mut filter = String::from("name==");
    for c in name.chars() {
        match c {
            '%' => filter.push_str("%25"),
            ',' => filter.push_str("%2C"),
            ';' => filter.push_str("%3B"),
            c => filter.push(c),
        }
    }
    filter
}
