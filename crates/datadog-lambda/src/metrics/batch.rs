// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Samples drained from the listener, and their v1 intake encoding.
//!
//! ```json
//! {"series":[{"metric":"m","tags":["a:b"],"type":"distribution","points":[[1700000000,[1.0,2.0]]]}]}
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::sample::Sample;

const DISTRIBUTION_TYPE: &str = "distribution";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    samples: Vec<Sample>,
}

/// One metric context (name and tags) with its values bucketed by second.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Series {
    pub metric: String,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub metric_type: &'static str,
    pub points: Vec<(u64, Vec<f64>)>,
}

#[derive(Serialize)]
struct DistributionPayload {
    series: Vec<Series>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Moves every sample out, leaving this batch empty.
    pub fn take(&mut self) -> Batch {
        Batch {
            samples: std::mem::take(&mut self.samples),
        }
    }

    /// Groups values by name, tags and second. Repeated values are kept.
    pub fn to_series(&self) -> Vec<Series> {
        let mut contexts: BTreeMap<(&str, &[String]), BTreeMap<u64, Vec<f64>>> = BTreeMap::new();
        for sample in &self.samples {
            contexts
                .entry((sample.name.as_str(), sample.tags.as_slice()))
                .or_default()
                .entry(sample.unix_seconds())
                .or_default()
                .push(sample.value);
        }

        contexts
            .into_iter()
            .map(|((metric, tags), points)| Series {
                metric: metric.to_string(),
                tags: tags.to_vec(),
                metric_type: DISTRIBUTION_TYPE,
                points: points.into_iter().collect(),
            })
            .collect()
    }

    /// JSON body for `POST /api/v1/distribution_points`
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&DistributionPayload {
            series: self.to_series(),
        })
    }
}

impl FromIterator<Sample> for Batch {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Batch {
            samples: iter.into_iter().collect(),
        }
    }
}
