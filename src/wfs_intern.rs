//! Filtering of features already loaded into the map.

use std::rc::Rc;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};

use crate::config::FilterConfig;
use crate::error::Result;
use crate::feature::{Feature, FeatureProvider};
use crate::interface::{
    get_min_max_from_unique_values, register_stream, AttrTypes, AttrType, FilterService, FilterStream, MinMax,
};
use crate::predicate::check_rules;
use crate::register::IntervalRegister;
use crate::rule::{Commands, FilterAnswer, FilterId, FilterQuestion, Rule, Service};
use crate::value::{value_of, UniqueValues, Value};

pub struct WfsIntern {
    config: Rc<FilterConfig>,
    provider: Rc<dyn FeatureProvider>,
    register: IntervalRegister,
}

impl WfsIntern {
    pub fn new(config: Rc<FilterConfig>, provider: Rc<dyn FeatureProvider>, register: IntervalRegister) -> Self {
        Self {
            config,
            provider,
            register,
        }
    }
}

/// Attribute types inferred from the first feature carrying each attribute.
pub fn infer_attr_types(features: &[Feature]) -> AttrTypes {
    let mut types = AttrTypes::new();
    for feature in features {
        for (name, value) in feature.properties.iter() {
            if types.contains_key(name) {
                continue;
            }
            if let Some(t) = AttrType::of_value(value) {
                types.insert(name.clone(), t);
            }
        }
    }
    types
}

pub fn unique_values(features: &[Feature], attr_name: &str) -> Vec<Value> {
    let mut values = UniqueValues::new();
    for feature in features {
        if let Some(v) = value_of(feature, attr_name) {
            values.insert(v.clone());
        }
    }
    values.into_vec()
}

/// The features of `chunk` matching the rules and the spatial commands.
fn matching_features(
    provider: &dyn FeatureProvider,
    chunk: &[Feature],
    rules: &[Rule],
    commands: &Commands,
) -> Vec<Feature> {
    chunk
        .iter()
        .filter(|f| check_rules(rules, *f))
        .filter(|f| !commands.search_in_map_extent || provider.is_feature_in_map_extent(f))
        .filter(|f| match &commands.geometry {
            Some(g) => provider.is_feature_in_geometry(f, g),
            None => true,
        })
        .cloned()
        .collect()
}

#[async_trait(?Send)]
impl FilterService for WfsIntern {
    async fn get_attr_types(&self, service: &Service, _filter_id: FilterId) -> Result<AttrTypes> {
        let features = self.provider.get_features_by_layer_id(&service.layer_id);
        Ok(infer_attr_types(&features))
    }

    async fn get_min_max(
        &self,
        service: &Service,
        attr_name: &str,
        min: bool,
        max: bool,
        filter_id: FilterId,
    ) -> Result<MinMax> {
        let values = self.get_unique_values(service, attr_name, filter_id).await?;
        Ok(get_min_max_from_unique_values(&values, min, max))
    }

    async fn get_unique_values(
        &self,
        service: &Service,
        attr_name: &str,
        _filter_id: FilterId,
    ) -> Result<Vec<Value>> {
        let features = self.provider.get_features_by_layer_id(&service.layer_id);
        Ok(unique_values(&features, attr_name))
    }

    fn filter(&self, question: FilterQuestion) -> FilterStream {
        let (registration, ticket) = self.register.start(question.filter_id);
        let features = Rc::new(self.provider.get_features_by_layer_id(&question.service.layer_id));
        let paging = question
            .commands
            .paging
            .unwrap_or(self.config.default_paging)
            .max(1);
        let total = features.len().div_ceil(paging).max(1);
        tracing::debug!(
            filter_id = question.filter_id,
            features = features.len(),
            paging,
            total,
            "filtering loaded layer"
        );

        let provider = self.provider.clone();
        let question = Rc::new(question);
        let pages = stream::iter(1..=total).then(move |page| {
            let start = ((page - 1) * paging).min(features.len());
            let end = (start + paging).min(features.len());
            let items = matching_features(
                provider.as_ref(),
                &features[start..end],
                &question.rules,
                &question.commands,
            );
            future::ready(Ok(FilterAnswer {
                filter_id: question.filter_id,
                service: question.service.clone(),
                items,
                page,
                total,
            }))
        });
        register_stream(pages, &self.register, ticket, registration)
    }

    fn stop(&self, filter_id: FilterId) {
        self.register.stop(filter_id);
    }
}
