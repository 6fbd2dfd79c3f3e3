//! Cross-model box aggregation.
//!
//! Raw detections of one category are ranked by `confidence × model weight`
//! and swept greedily. A candidate joins the best-overlapping cluster accepted
//! so far (IoU at or above the threshold) or seeds a new one. Clusters whose
//! fused boxes drift into each other are consolidated afterwards, so feeding
//! the output back in reproduces it.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::ModelWeights;
use crate::detection::{BBox, Category, ModelId, RawDetection, iou_batch};

/// How clusters of overlapping detections become merged detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    /// Weighted box fusion of every cluster.
    #[default]
    WeightedFusion,
    /// The top-ranked box of each cluster survives unchanged.
    #[serde(alias = "average")]
    UnionNms,
    /// Weighted box fusion, keeping clusters that enough models agree on.
    WeightedVoting,
}

impl AggregationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::WeightedFusion => "weighted_fusion",
            AggregationMethod::UnionNms => "union_nms",
            AggregationMethod::WeightedVoting => "weighted_voting",
        }
    }
}

impl std::str::FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted_fusion" => Ok(Self::WeightedFusion),
            // "average" is the legacy name of union NMS
            "union_nms" | "average" => Ok(Self::UnionNms),
            "weighted_voting" => Ok(Self::WeightedVoting),
            other => Err(format!("unknown aggregation method '{other}'")),
        }
    }
}

/// One object after reconciliation across models.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDetection {
    pub category: Category,
    pub bbox: BBox,
    pub confidence: f32,
    /// Models with at least one detection in this cluster. Never empty.
    pub contributing_models: BTreeSet<ModelId>,
    /// Raw detections fused into this one.
    pub num_votes: usize,
}

impl MergedDetection {
    /// Wrap a single raw detection without altering it.
    pub fn from_raw(raw: &RawDetection) -> Self {
        Self {
            category: raw.category,
            bbox: raw.bbox,
            confidence: raw.confidence,
            contributing_models: BTreeSet::from([raw.source_model_id.clone()]),
            num_votes: 1,
        }
    }
}

/// Configured aggregation stage.
#[derive(Debug, Clone, Copy)]
pub struct BoxAggregator {
    method: AggregationMethod,
    iou_threshold: f32,
    min_votes: usize,
}

impl BoxAggregator {
    pub fn new(method: AggregationMethod, iou_threshold: f32, min_votes: usize) -> Self {
        Self {
            method,
            iou_threshold,
            min_votes,
        }
    }

    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    pub fn aggregate(&self, raw: &[RawDetection], weights: &ModelWeights) -> Vec<MergedDetection> {
        match self.method {
            AggregationMethod::WeightedFusion => merge(raw, weights, self.iou_threshold),
            AggregationMethod::UnionNms => union_nms(raw, weights, self.iou_threshold),
            AggregationMethod::WeightedVoting => {
                let mut merged = merge(raw, weights, self.iou_threshold);
                merged.retain(|m| m.contributing_models.len() >= self.min_votes);
                merged
            }
        }
    }
}

/// Weighted box fusion over all raw detections.
///
/// The result is ordered by descending fused confidence and depends only on
/// the input multiset, not on its order.
pub fn merge(raw: &[RawDetection], weights: &ModelWeights, iou_threshold: f32) -> Vec<MergedDetection> {
    let mut merged = Vec::new();
    for category in Category::ALL {
        let candidates = ranked(raw, category, weights);
        if candidates.is_empty() {
            continue;
        }
        let clusters = sweep(candidates, iou_threshold, true);
        let clusters = consolidate(clusters, iou_threshold);
        merged.extend(clusters.into_iter().map(Cluster::finish));
    }
    sort_output(&mut merged);
    merged
}

/// Greedy NMS across models: each cluster keeps its top-ranked box and
/// confidence, and collects the models that agreed with it.
pub fn union_nms(
    raw: &[RawDetection],
    weights: &ModelWeights,
    iou_threshold: f32,
) -> Vec<MergedDetection> {
    let mut merged = Vec::new();
    for category in Category::ALL {
        let candidates = ranked(raw, category, weights);
        if candidates.is_empty() {
            continue;
        }
        merged.extend(
            sweep(candidates, iou_threshold, false)
                .into_iter()
                .map(Cluster::finish),
        );
    }
    sort_output(&mut merged);
    merged
}

/// One merged detection per raw detection, unchanged.
pub fn passthrough(raw: &[RawDetection]) -> Vec<MergedDetection> {
    let mut merged: Vec<MergedDetection> = raw.iter().map(MergedDetection::from_raw).collect();
    sort_output(&mut merged);
    merged
}

struct Candidate<'a> {
    det: &'a RawDetection,
    weight: f32,
    score: f64,
}

fn ranked<'a>(raw: &'a [RawDetection], category: Category, weights: &ModelWeights) -> Vec<Candidate<'a>> {
    let mut candidates: Vec<Candidate<'a>> = raw
        .iter()
        .filter(|d| d.category == category)
        .map(|det| {
            let weight = weights.weight(&det.source_model_id);
            Candidate {
                det,
                weight,
                score: f64::from(det.confidence) * f64::from(weight),
            }
        })
        .collect();
    candidates.sort_by(rank_order);
    candidates
}

// Higher score first; ties go to the more trusted model, then the tighter box.
// The remaining keys only make the order total.
fn rank_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.weight.total_cmp(&a.weight))
        .then_with(|| a.det.bbox.area().total_cmp(&b.det.bbox.area()))
        .then_with(|| b.det.confidence.total_cmp(&a.det.confidence))
        .then_with(|| cmp_boxes(&a.det.bbox, &b.det.bbox))
        .then_with(|| a.det.source_model_id.cmp(&b.det.source_model_id))
}

fn cmp_boxes(a: &BBox, b: &BBox) -> Ordering {
    a.to_tlbr()
        .iter()
        .zip(b.to_tlbr().iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn sort_output(merged: &mut [MergedDetection]) {
    merged.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| cmp_boxes(&a.bbox, &b.bbox))
    });
}

fn sweep(candidates: Vec<Candidate<'_>>, iou_threshold: f32, fuse: bool) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    for candidate in candidates {
        let best = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.bbox.iou(&candidate.det.bbox)))
            .filter(|&(_, iou)| iou >= iou_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        let member = Member::from(&candidate);
        match best {
            Some((i, _)) => clusters[i].absorb(member, fuse),
            None => clusters.push(Cluster::seed(candidate.det.category, member)),
        }
    }
    clusters
}

// Merge clusters until no two fused boxes overlap at the threshold. The
// higher-ranked cluster of a pair absorbs the other.
fn consolidate(mut clusters: Vec<Cluster>, iou_threshold: f32) -> Vec<Cluster> {
    loop {
        let boxes: Vec<BBox> = clusters.iter().map(|c| c.bbox).collect();
        let ious = iou_batch(&boxes, &boxes);
        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..boxes.len() {
            for j in (i + 1)..boxes.len() {
                let iou = ious[[i, j]];
                if iou >= iou_threshold && best.is_none_or(|(_, _, b)| iou > b) {
                    best = Some((i, j, iou));
                }
            }
        }
        let Some((i, j, _)) = best else {
            return clusters;
        };
        let absorbed = clusters.remove(j);
        clusters[i].absorb_cluster(absorbed);
    }
}

struct Member {
    bbox: BBox,
    confidence: f32,
    fusion_weight: f64,
    model: ModelId,
}

impl From<&Candidate<'_>> for Member {
    fn from(c: &Candidate<'_>) -> Self {
        Self {
            bbox: c.det.bbox,
            confidence: c.det.confidence,
            fusion_weight: c.score,
            model: c.det.source_model_id.clone(),
        }
    }
}

struct Cluster {
    category: Category,
    members: Vec<Member>,
    bbox: BBox,
    confidence: f32,
}

impl Cluster {
    fn seed(category: Category, member: Member) -> Self {
        Self {
            category,
            bbox: member.bbox,
            confidence: member.confidence,
            members: vec![member],
        }
    }

    fn absorb(&mut self, member: Member, fuse: bool) {
        self.members.push(member);
        if fuse {
            self.refresh();
        }
    }

    fn absorb_cluster(&mut self, other: Cluster) {
        self.members.extend(other.members);
        self.refresh();
    }

    fn refresh(&mut self) {
        if let [only] = self.members.as_slice() {
            self.bbox = only.bbox;
            self.confidence = only.confidence;
            return;
        }
        let total: f64 = self.members.iter().map(|m| m.fusion_weight).sum();
        // All-zero fusion weights fall back to a plain mean.
        let weight_of = |m: &Member| {
            if total > 0.0 {
                m.fusion_weight / total
            } else {
                1.0 / self.members.len() as f64
            }
        };

        let mut coords = [0.0f64; 4];
        let mut confidence = 0.0f64;
        for m in &self.members {
            let w = weight_of(m);
            for (acc, v) in coords.iter_mut().zip(m.bbox.to_tlbr()) {
                *acc += w * f64::from(v);
            }
            confidence += w * f64::from(m.confidence);
        }

        let (lo, hi) = self
            .members
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), m| {
                (lo.min(m.confidence), hi.max(m.confidence))
            });
        self.bbox = BBox::new(
            coords[0] as f32,
            coords[1] as f32,
            coords[2] as f32,
            coords[3] as f32,
        );
        self.confidence = (confidence as f32).clamp(lo, hi);
    }

    fn finish(self) -> MergedDetection {
        let num_votes = self.members.len();
        MergedDetection {
            category: self.category,
            bbox: self.bbox,
            confidence: self.confidence,
            contributing_models: self.members.into_iter().map(|m| m.model).collect(),
            num_votes,
        }
    }
}
