use async_trait::async_trait;
use concierge_agent::module::string_argument;
use concierge_agent::{Module, ModuleContext};
use concierge_core::{
    DescriptorError, FunctionError, FunctionSpec, ModuleDescriptor, ParameterSchema, ParameterType,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::common::{execute_common, keywords, to_content, with_common_functions};

pub const NAME: &str = "internet_sales";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub technology: String,
    pub speed_mbps: u32,
    pub monthly_price: u32,
    pub data_cap_gb: Option<u32>,
}

impl Package {
    fn new(
        name: &str,
        technology: &str,
        speed_mbps: u32,
        monthly_price: u32,
        data_cap_gb: Option<u32>,
    ) -> Self {
        Self {
            name: name.to_string(),
            technology: technology.to_string(),
            speed_mbps,
            monthly_price,
            data_cap_gb,
        }
    }
}

pub fn catalog() -> Vec<Package> {
    vec![
        Package::new("Basic ADSL 16", "adsl", 16, 15, Some(200)),
        Package::new("Home ADSL 24", "adsl", 24, 22, None),
        Package::new("Fiber 100", "fiber", 100, 29, None),
        Package::new("Fiber 300", "fiber", 300, 39, None),
        Package::new("Fiber 1000", "fiber", 1000, 59, None),
        Package::new("Mobile LTE 50", "lte", 50, 25, Some(100)),
    ]
}

/// Filters pulled out of a free-text package question.
#[derive(Debug, Default, PartialEq, Eq)]
struct PackageFilter {
    words: Vec<String>,
    max_price: Option<u32>,
    min_speed: Option<u32>,
}

impl PackageFilter {
    /// `under 30` / `below 30` / `max 30` caps the price; `100 mbps` sets a
    /// speed floor.
    fn parse(query: &str) -> Self {
        let lowered = query.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        let mut filter = Self { words: keywords(query), ..Self::default() };

        for (index, token) in tokens.iter().enumerate() {
            let number = token.trim_matches(|ch: char| !ch.is_ascii_digit()).parse::<u32>();
            let Ok(number) = number else {
                continue;
            };

            let previous = index.checked_sub(1).and_then(|prev| tokens.get(prev)).copied();
            let next = tokens.get(index + 1).copied();
            let speed_unit = next.is_some_and(|next| next.starts_with("mbps"));
            if matches!(previous, Some("under" | "below" | "max" | "cheaper" | "less")) {
                filter.max_price = Some(number);
            } else if token.ends_with("mbps") || speed_unit {
                filter.min_speed = Some(number);
            }
        }

        filter
    }

    fn accepts(&self, package: &Package) -> bool {
        if self.max_price.is_some_and(|cap| package.monthly_price > cap) {
            return false;
        }
        if self.min_speed.is_some_and(|floor| package.speed_mbps < floor) {
            return false;
        }
        true
    }

    fn mentions(&self, package: &Package) -> bool {
        let name = package.name.to_lowercase();
        self.words.iter().any(|word| word == &package.technology || name.contains(word.as_str()))
    }
}

pub fn descriptor() -> Result<ModuleDescriptor, DescriptorError> {
    ModuleDescriptor::new(
        NAME,
        "Internet sales and support desk",
        "You are a voice assistant working as an internet sales and support operator. Keep \
         answers short (two or three sentences) and never use emoji. Quote prices only from \
         package lookups.",
        with_common_functions(vec![FunctionSpec::new(
            "query_packages",
            "Use this when the caller asks about internet packages, prices or speeds.",
            ParameterSchema::object().required(
                "query",
                ParameterType::String,
                "What to look for, e.g. 'fiber under 40' or '100 mbps'.",
            ),
        )]),
    )
}

pub struct InternetSalesModule {
    descriptor: ModuleDescriptor,
    context: ModuleContext,
    packages: Vec<Package>,
}

impl InternetSalesModule {
    pub fn new(
        descriptor: ModuleDescriptor,
        context: ModuleContext,
        packages: Vec<Package>,
    ) -> Self {
        Self { descriptor, context, packages }
    }

    fn query_packages(&self, query: &str) -> Result<String, FunctionError> {
        let filter = PackageFilter::parse(query);
        let within_limits: Vec<&Package> =
            self.packages.iter().filter(|package| filter.accepts(package)).collect();

        let mentioned: Vec<&Package> =
            within_limits.iter().copied().filter(|package| filter.mentions(package)).collect();
        let packages = if mentioned.is_empty() { within_limits } else { mentioned };

        to_content(&json!({ "query": query, "count": packages.len(), "packages": packages }))
    }
}

#[async_trait]
impl Module for InternetSalesModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn execute_function(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<String, FunctionError> {
        if let Some(result) = execute_common(name, &self.context) {
            return result;
        }

        match name {
            "query_packages" => self.query_packages(string_argument(arguments, "query")?),
            other => Err(FunctionError::unknown(other)),
        }
    }
}
