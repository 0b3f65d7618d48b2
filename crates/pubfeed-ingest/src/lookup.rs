//! Per-run lookup cache
//!
//! Users, terms and products are read from the store once per run. Parsers
//! only ever see this snapshot, which keeps parsing a pure function of the
//! raw bytes and the cache.

use crate::model::{TermRef, UserId};
use crate::store::{ContentStore, Product, StoreResult, Term, User};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Terms of one taxonomy, indexed for lookup
#[derive(Debug, Default)]
struct TermIndex {
    by_name: HashMap<String, TermRef>,
    by_synonym: HashMap<String, TermRef>,
    by_slug: HashMap<String, TermRef>,
}

impl TermIndex {
    fn insert(&mut self, term: &Term) {
        let term_ref = TermRef::resolved(term.name.clone(), term.id);
        self.by_name.entry(term.name.clone()).or_insert_with(|| term_ref.clone());
        self.by_slug.entry(term.slug.clone()).or_insert_with(|| term_ref.clone());
        for synonym in &term.synonyms {
            self.by_synonym
                .entry(synonym.clone())
                .or_insert_with(|| term_ref.clone());
        }
    }
}

#[derive(Debug, Default)]
pub struct LookupCache {
    logins: HashMap<String, UserId>,
    /// Lower-cased display name of author-capable users
    authors: HashMap<String, UserId>,
    /// Lower-cased display name or login of every user
    names: HashMap<String, UserId>,
    author_pattern: Option<Regex>,
    initials: HashMap<String, UserId>,
    terms: HashMap<String, TermIndex>,
    products: HashMap<String, Product>,
    importer: Option<UserId>,
}

impl LookupCache {
    /// Snapshot users, terms and the given product SKUs from the store.
    pub fn build<'a, I>(store: &dyn ContentStore, skus: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut cache = Self::from_parts(&store.list_users()?, &store.list_terms()?);

        for sku in skus {
            match store.find_product_by_sku(sku)? {
                Some(product) => {
                    cache.products.insert(sku.to_string(), product);
                },
                None => warn!(sku = sku, "Product not found"),
            }
        }

        cache.importer = store.importer_user()?.map(|u| u.id);
        debug!(
            users = cache.logins.len(),
            authors = cache.authors.len(),
            taxonomies = cache.terms.len(),
            products = cache.products.len(),
            "Built lookup cache"
        );
        Ok(cache)
    }

    /// Build from already loaded users and terms.
    pub fn from_parts(users: &[User], terms: &[Term]) -> Self {
        let mut cache = Self::default();

        for user in users {
            cache.logins.insert(user.login.clone(), user.id);
            cache
                .names
                .entry(user.display_name.to_lowercase())
                .or_insert(user.id);
            cache.names.entry(user.login.to_lowercase()).or_insert(user.id);
            if user.roles.iter().any(|r| r.can_author()) && !user.display_name.trim().is_empty() {
                cache
                    .authors
                    .entry(user.display_name.to_lowercase())
                    .or_insert(user.id);
            }
            for initials in &user.initials {
                cache.initials.entry(initials.clone()).or_insert(user.id);
            }
        }
        cache.author_pattern = author_pattern(cache.authors.keys());

        for term in terms {
            cache
                .terms
                .entry(term.taxonomy.clone())
                .or_default()
                .insert(term);
        }
        cache
    }

    pub fn with_product(mut self, product: Product) -> Self {
        self.products.insert(product.sku.clone(), product);
        self
    }

    pub fn user_by_login(&self, login: &str) -> Option<UserId> {
        self.logins.get(login).copied()
    }

    /// User whose display name or login equals `name`, ignoring case
    pub fn user_by_name(&self, name: &str) -> Option<UserId> {
        self.names.get(&name.trim().to_lowercase()).copied()
    }

    /// First author display name occurring as a whole word in `text`
    pub fn match_author(&self, text: &str) -> Option<UserId> {
        let pattern = self.author_pattern.as_ref()?;
        let found = pattern.find(text)?;
        self.authors.get(&found.as_str().to_lowercase()).copied()
    }

    pub fn user_by_initials(&self, initials: &str) -> Option<UserId> {
        self.initials.get(initials).copied()
    }

    /// Existing term by exact name, then synonym
    pub fn term(&self, taxonomy: &str, name: &str) -> Option<TermRef> {
        let index = self.terms.get(taxonomy)?;
        index
            .by_name
            .get(name)
            .or_else(|| index.by_synonym.get(name))
            .cloned()
    }

    pub fn term_by_slug(&self, taxonomy: &str, slug: &str) -> Option<TermRef> {
        self.terms.get(taxonomy)?.by_slug.get(slug).cloned()
    }

    /// Term by name or synonym, falling back to slug
    pub fn term_by_name_or_slug(&self, taxonomy: &str, value: &str) -> Option<TermRef> {
        self.term(taxonomy, value)
            .or_else(|| self.term_by_slug(taxonomy, value))
    }

    pub fn product(&self, sku: &str) -> Option<&Product> {
        self.products.get(sku)
    }

    /// The importer's own account
    pub fn importer(&self) -> Option<UserId> {
        self.importer
    }

    pub fn set_importer(&mut self, id: Option<UserId>) {
        self.importer = id;
    }
}

/// Case-insensitive whole-word alternation of names, longest first
fn author_pattern<'a, I>(names: I) -> Option<Regex>
where
    I: Iterator<Item = &'a String>,
{
    let mut names: Vec<&String> = names.collect();
    if names.is_empty() {
        return None;
    }
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");

    match Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "Author name pattern rejected, matching by name disabled");
            None
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::store::Role;
    use std::collections::BTreeMap;

    pub(crate) fn user(id: UserId, login: &str, display_name: &str, roles: &[Role]) -> User {
        User {
            id,
            login: login.to_string(),
            email: format!("{}@example.org", login),
            display_name: display_name.to_string(),
            first_name: None,
            last_name: None,
            roles: roles.to_vec(),
            initials: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub(crate) fn term(id: i64, taxonomy: &str, name: &str, slug: &str, synonyms: &[&str]) -> Term {
        Term {
            id,
            taxonomy: taxonomy.to_string(),
            name: name.to_string(),
            slug: slug.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_match_author_whole_word_case_insensitive() {
        let users = vec![
            user(1, "jdoe", "Jane Doe", &[Role::Author]),
            user(2, "jdoe2", "Jane Doerr", &[Role::Editor]),
            user(3, "cust", "Max Kunde", &[Role::Customer]),
        ];
        let cache = LookupCache::from_parts(&users, &[]);

        assert_eq!(cache.match_author("Text von JANE DOE, Pegnitz"), Some(1));
        assert_eq!(cache.match_author("Von Jane Doerr"), Some(2));
        assert_eq!(cache.match_author("Jane Doeing"), None);
        // customers never author
        assert_eq!(cache.match_author("Max Kunde"), None);
    }

    #[test]
    fn test_terms_by_name_synonym_and_slug() {
        let terms = vec![
            term(10, "category", "Sport", "sport", &["Fußball"]),
            term(11, "category", "News", "news", &[]),
        ];
        let cache = LookupCache::from_parts(&[], &terms);

        assert_eq!(cache.term("category", "Sport").unwrap().id, Some(10));
        assert_eq!(cache.term("category", "Fußball").unwrap().name, "Sport");
        assert!(cache.term("category", "sport").is_none());
        assert_eq!(cache.term_by_name_or_slug("category", "news").unwrap().id, Some(11));
        assert!(cache.term("location", "Sport").is_none());
    }

    #[test]
    fn test_user_lookups() {
        let mut admin = user(1, "system", "Importer", &[Role::Administrator]);
        admin.initials = vec!["sb".to_string()];
        let cache = LookupCache::from_parts(&[admin], &[]);

        assert_eq!(cache.user_by_login("system"), Some(1));
        assert_eq!(cache.user_by_name("importer"), Some(1));
        assert_eq!(cache.user_by_initials("sb"), Some(1));
        assert_eq!(cache.user_by_initials("xy"), None);
    }
}
