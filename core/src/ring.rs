//! Entity resolution over shared identifiers.
//!
//! Members that share an IP address or device are joined through a
//! resource node. Connected components are found with union-find, so
//! the partition depends only on the edge set, never on insertion order.
//! A component is a fraud ring once it holds `min_ring_members` members.

use crate::{
    config::RingConfig,
    record::Member,
    types::MemberId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum RiskNode {
    Member(MemberId),
    SharedIp(String),
    SharedDevice(String),
}

impl RiskNode {
    pub fn is_member(&self) -> bool {
        matches!(self, RiskNode::Member(_))
    }
}

// ── Union-find ───────────────────────────────────────────────────────────────

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

// ── Graph ────────────────────────────────────────────────────────────────────

/// Undirected member/resource graph. Rebuilt every run.
#[derive(Debug, Clone, Default)]
pub struct RiskGraph {
    nodes: Vec<RiskNode>,
    index: HashMap<RiskNode, usize>,
    edges: Vec<(usize, usize)>,
}

impl RiskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: RiskNode) -> usize {
        if let Some(&id) = self.index.get(&node) {
            return id;
        }
        let id = self.nodes.len();
        self.index.insert(node.clone(), id);
        self.nodes.push(node);
        id
    }

    pub fn add_edge(&mut self, a: RiskNode, b: RiskNode) {
        let a = self.add_node(a);
        let b = self.add_node(b);
        self.edges.push((a, b));
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Build from member attributes. Only identifiers seen on more than
    /// one member become resource nodes.
    pub fn from_members(members: &[Member]) -> Self {
        let mut ip_counts: HashMap<&str, usize> = HashMap::new();
        let mut device_counts: HashMap<&str, usize> = HashMap::new();
        for m in members {
            if let Some(ip) = m.ip_address.as_deref().filter(|s| !s.is_empty()) {
                *ip_counts.entry(ip).or_default() += 1;
            }
            if let Some(dev) = m.device_id.as_deref().filter(|s| !s.is_empty()) {
                *device_counts.entry(dev).or_default() += 1;
            }
        }

        let mut graph = Self::new();
        for m in members {
            let shared_ip = m
                .ip_address
                .as_deref()
                .filter(|ip| ip_counts.get(ip).is_some_and(|&c| c > 1));
            let shared_device = m
                .device_id
                .as_deref()
                .filter(|dev| device_counts.get(dev).is_some_and(|&c| c > 1));

            if shared_ip.is_none() && shared_device.is_none() {
                continue;
            }
            let member = RiskNode::Member(m.member_id.clone());
            graph.add_node(member.clone());
            if let Some(ip) = shared_ip {
                graph.add_edge(member.clone(), RiskNode::SharedIp(ip.to_string()));
            }
            if let Some(dev) = shared_device {
                graph.add_edge(member, RiskNode::SharedDevice(dev.to_string()));
            }
        }
        graph
    }

    /// Connected components, each sorted, in canonical order.
    pub fn connected_components(&self) -> Vec<Vec<RiskNode>> {
        let mut sets = DisjointSet::new(self.nodes.len());
        for &(a, b) in &self.edges {
            sets.union(a, b);
        }

        let mut groups: HashMap<usize, BTreeSet<RiskNode>> = HashMap::new();
        for (id, node) in self.nodes.iter().enumerate() {
            groups.entry(sets.find(id)).or_default().insert(node.clone());
        }

        let mut components: Vec<Vec<RiskNode>> = groups
            .into_values()
            .map(|set| set.into_iter().collect())
            .collect();
        components.sort();
        components
    }
}

// ── Rings ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudRing {
    /// Sorted member ids.
    pub members: Vec<MemberId>,
    pub shared_ips: Vec<String>,
    pub shared_devices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RingReport {
    pub rings: Vec<FraudRing>,
    /// member_id -> network_risk_flag for every input member.
    pub flags: BTreeMap<MemberId, bool>,
}

impl RingReport {
    pub fn is_flagged(&self, member_id: &str) -> bool {
        self.flags.get(member_id).copied().unwrap_or(false)
    }

    pub fn flagged_members(&self) -> impl Iterator<Item = &MemberId> {
        self.flags.iter().filter(|(_, &f)| f).map(|(id, _)| id)
    }
}

pub struct RingDetector<'a> {
    config: &'a RingConfig,
}

impl<'a> RingDetector<'a> {
    pub fn new(config: &'a RingConfig) -> Self {
        Self { config }
    }

    pub fn rings(&self, graph: &RiskGraph) -> Vec<FraudRing> {
        let mut rings: Vec<FraudRing> = graph
            .connected_components()
            .into_iter()
            .filter_map(|component| {
                let mut ring = FraudRing {
                    members: Vec::new(),
                    shared_ips: Vec::new(),
                    shared_devices: Vec::new(),
                };
                for node in component {
                    match node {
                        RiskNode::Member(id) => ring.members.push(id),
                        RiskNode::SharedIp(ip) => ring.shared_ips.push(ip),
                        RiskNode::SharedDevice(dev) => ring.shared_devices.push(dev),
                    }
                }
                (ring.members.len() >= self.config.min_ring_members).then_some(ring)
            })
            .collect();
        rings.sort_by(|a, b| a.members.cmp(&b.members));
        rings
    }

    pub fn detect(&self, members: &[Member]) -> RingReport {
        let graph = RiskGraph::from_members(members);
        let rings = self.rings(&graph);

        let ring_members: BTreeSet<&str> = rings
            .iter()
            .flat_map(|r| r.members.iter().map(String::as_str))
            .collect();
        let flags = members
            .iter()
            .map(|m| (m.member_id.clone(), ring_members.contains(m.member_id.as_str())))
            .collect();

        log::info!(
            "Risk graph: {} nodes, {} edges, {} rings covering {} members",
            graph.node_count(),
            graph.edge_count(),
            rings.len(),
            ring_members.len()
        );
        RingReport { rings, flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, ip: Option<&str>, device: Option<&str>) -> Member {
        Member {
            member_id: id.into(),
            join_date: None,
            tier: None,
            city: None,
            state: None,
            email_domain: None,
            ip_address: ip.map(Into::into),
            device_id: device.map(Into::into),
        }
    }

    #[test]
    fn pair_on_shared_ip_is_not_a_ring() {
        let members = vec![
            member("m1", Some("10.0.0.1"), Some("d1")),
            member("m2", Some("10.0.0.1"), Some("d2")),
            member("m3", Some("10.0.0.9"), Some("d3")),
        ];
        let config = RingConfig::default();
        let report = RingDetector::new(&config).detect(&members);
        assert!(report.rings.is_empty());
        assert!(!report.is_flagged("m1"));
        assert!(!report.is_flagged("m2"));
    }

    #[test]
    fn chain_through_ip_and_device_forms_ring() {
        // m1 -ip- m2 -device- m3
        let members = vec![
            member("m1", Some("ip-a"), Some("d1")),
            member("m2", Some("ip-a"), Some("d-shared")),
            member("m3", Some("ip-z"), Some("d-shared")),
            member("m4", Some("ip-q"), Some("d4")),
        ];
        let config = RingConfig::default();
        let report = RingDetector::new(&config).detect(&members);
        assert_eq!(report.rings.len(), 1);
        assert_eq!(report.rings[0].members, vec!["m1", "m2", "m3"]);
        assert_eq!(report.rings[0].shared_ips, vec!["ip-a"]);
        assert_eq!(report.rings[0].shared_devices, vec!["d-shared"]);
        assert!(report.is_flagged("m3"));
        assert!(!report.is_flagged("m4"));
        assert_eq!(report.flagged_members().count(), 3);
    }

    #[test]
    fn no_shared_identifiers_means_no_edges() {
        let members = vec![
            member("m1", Some("a"), None),
            member("m2", Some("b"), None),
            member("m3", None, None),
        ];
        let graph = RiskGraph::from_members(&members);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        let config = RingConfig::default();
        let report = RingDetector::new(&config).detect(&members);
        assert!(report.rings.is_empty());
        assert_eq!(report.flags.len(), 3);
    }

    #[test]
    fn partition_ignores_insertion_order() {
        let edges = vec![
            (RiskNode::Member("m1".into()), RiskNode::SharedIp("x".into())),
            (RiskNode::Member("m2".into()), RiskNode::SharedIp("x".into())),
            (RiskNode::Member("m3".into()), RiskNode::SharedDevice("y".into())),
            (RiskNode::Member("m2".into()), RiskNode::SharedDevice("y".into())),
            (RiskNode::Member("m7".into()), RiskNode::SharedIp("z".into())),
            (RiskNode::Member("m8".into()), RiskNode::SharedIp("z".into())),
        ];
        let mut forward = RiskGraph::new();
        for (a, b) in edges.iter().cloned() {
            forward.add_edge(a, b);
        }
        let mut backward = RiskGraph::new();
        for (a, b) in edges.iter().rev().cloned() {
            backward.add_edge(b, a);
        }
        assert_eq!(forward.connected_components(), backward.connected_components());

        let config = RingConfig::default();
        let detector = RingDetector::new(&config);
        assert_eq!(detector.rings(&forward), detector.rings(&backward));
        assert_eq!(detector.rings(&forward).len(), 1);
    }

    #[test]
    fn every_component_with_three_members_is_a_ring() {
        let mut members = Vec::new();
        for i in 0..4 {
            members.push(member(&format!("a{i}"), Some("ip-a"), None));
        }
        for i in 0..2 {
            members.push(member(&format!("b{i}"), Some("ip-b"), None));
        }
        for i in 0..3 {
            members.push(member(&format!("c{i}"), None, Some("dev-c")));
        }
        let graph = RiskGraph::from_members(&members);
        let config = RingConfig::default();
        let rings = RingDetector::new(&config).rings(&graph);

        for component in graph.connected_components() {
            let member_count = component.iter().filter(|n| n.is_member()).count();
            let is_ring = rings.iter().any(|r| {
                component.contains(&RiskNode::Member(r.members[0].clone()))
            });
            assert_eq!(is_ring, member_count >= 3);
        }
        assert_eq!(rings.len(), 2);
    }
}
