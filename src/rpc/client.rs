//! Blocking client for a keel server

use super::protocol::{self, Event, Frame, MachineRequest, Mode, Run, VersionInfo};
use anyhow::{Context as _, Result, anyhow, bail};
use dag::{Edge, Graph, Node, NodeId};
use declarative::{Context, Health, Status, Summary};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use url::Url;

pub struct Client {
    base: Url,
    agent: ureq::Agent,
}

impl Client {
    /// `addr` is a URL, or a bare `host:port` meaning plain HTTP
    pub fn new(addr: &str) -> Result<Self> {
        let with_scheme = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let base = Url::parse(&with_scheme).with_context(|| format!("Invalid server address {addr:?}"))?;
        if !matches!(base.scheme(), "http" | "https") {
            bail!("Unsupported server scheme {:?}", base.scheme());
        }
        Ok(Self {
            base,
            agent: ureq::Agent::new_with_defaults(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid endpoint {path}"))
    }

    pub fn ping(&self) -> Result<String> {
        let url = self.url(protocol::PING)?;
        let reply = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("Failed to reach {url}"))?
            .body_mut()
            .read_to_string()?;
        Ok(reply)
    }

    pub fn version(&self) -> Result<VersionInfo> {
        let url = self.url(protocol::VERSION)?;
        let info = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("Failed to reach {url}"))?
            .body_mut()
            .read_json()?;
        Ok(info)
    }

    /// Run `mode` remotely, calling `on_event` for every node event
    pub fn run(
        &self,
        ctx: &Context,
        mode: Mode,
        request: &MachineRequest,
        mut on_event: impl FnMut(&Event),
    ) -> Result<RemoteRun> {
        let url = self.url(mode.path())?;
        log::info!("{mode} {} on {}", request.location, self.base);
        let mut response = self
            .agent
            .post(url.as_str())
            .send_json(request)
            .with_context(|| format!("Failed to reach {url}"))?;

        let mut tracker = Tracker::default();
        let reader = BufReader::new(response.body_mut().as_reader());
        for line in reader.lines() {
            ctx.check()?;
            let line = line.context("Connection to server lost")?;
            if line.trim().is_empty() {
                continue;
            }
            let frame = Frame::parse(&line)?;
            if let Frame::Event(event) = &frame {
                on_event(event);
            }
            tracker.push(frame);
        }
        tracker.finish()
    }
}

/// A node as reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteNode {
    pub kind: Option<String>,
    pub status: Option<Status>,
    pub health: Option<Health>,
}

/// The graph of a remote run
pub type RemoteGraph = Graph<RemoteNode>;

/// The outcome of a remote run
#[derive(Debug)]
pub struct RemoteRun {
    pub graph: RemoteGraph,
    pub summary: Summary,
}

/// Rebuilds a remote run from its frames
#[derive(Debug, Default)]
pub struct Tracker {
    edges: Option<Vec<Edge>>,
    nodes: BTreeMap<NodeId, (RemoteNode, Option<String>)>,
    summary: Option<Summary>,
    error: Option<String>,
}

impl Tracker {
    pub fn push(&mut self, frame: Frame) {
        match frame {
            Frame::Edges(edges) => self.edges = Some(edges),
            Frame::Event(event) => {
                let (node, group) = self.nodes.entry(event.id).or_default();
                node.kind = event.kind.or(node.kind.take());
                *group = event.group.or(group.take());
                if event.run == Run::Finished {
                    node.status = event.details.map(Status::from);
                    node.health = event.health;
                }
            }
            Frame::Summary(summary) => self.summary = Some(summary),
            Frame::Error(error) => self.error = Some(error),
        }
    }

    /// The validated graph and summary
    pub fn finish(self) -> Result<RemoteRun> {
        if let Some(error) = self.error {
            return Err(anyhow!(error));
        }
        let edges = self.edges.ok_or_else(|| anyhow!("server sent no graph"))?;
        let summary = self
            .summary
            .ok_or_else(|| anyhow!("server closed the stream before the run finished"))?;

        let graph = RemoteGraph::new();
        graph.add(Node::new(NodeId::root(), RemoteNode::default()));
        for edge in &edges {
            for id in [&edge.source, &edge.dest] {
                if !graph.contains(id) {
                    graph.add(Node::new(id.clone(), RemoteNode::default()));
                }
            }
        }
        for (id, (node, group)) in self.nodes {
            graph.add(Node::new(id, node).with_group(group));
        }
        for edge in &edges {
            graph.connect(&edge.source, &edge.dest, edge.kind);
        }
        graph.validate().context("Server sent an inconsistent graph")?;
        Ok(RemoteRun { graph, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dag::EdgeKind;
    use declarative::{Level, Stage};

    fn event(id: &str, run: Run, status: Option<Status>) -> Frame {
        Frame::Event(Event {
            stage: Stage::Plan,
            run,
            id: NodeId::from(id),
            kind: Some("task".into()),
            group: None,
            details: status.map(|s| s.details()),
            health: None,
        })
    }

    fn edges() -> Frame {
        Frame::Edges(vec![
            Edge::new("root", "root/task.a", EdgeKind::Parent),
            Edge::new("root", "root/task.b", EdgeKind::Parent),
            Edge::new("root/task.b", "root/task.a", EdgeKind::Dependency),
        ])
    }

    #[test]
    fn test_rebuilds_graph() {
        let mut tracker = Tracker::default();
        tracker.push(edges());
        tracker.push(event("root/task.a", Run::Started, None));
        tracker.push(event("root/task.a", Run::Finished, Some(Status::new(Level::WillChange))));
        tracker.push(Frame::Summary(Summary::default()));

        let run = tracker.finish().unwrap();
        assert_eq!(run.graph.len(), 3);
        assert_eq!(run.graph.dependencies(&NodeId::from("root/task.b")), [NodeId::from("root/task.a")]);
        let a = run.graph.get(&NodeId::from("root/task.a")).unwrap();
        assert_eq!(a.value().status.as_ref().unwrap().level, Level::WillChange);
        assert_eq!(a.value().kind.as_deref(), Some("task"));
        let b = run.graph.get(&NodeId::from("root/task.b")).unwrap();
        assert!(b.value().status.is_none());
    }

    #[test]
    fn test_error_frame_wins() {
        let mut tracker = Tracker::default();
        tracker.push(Frame::Error("duplicate resource root/task.a".into()));
        let err = tracker.finish().unwrap_err();
        assert_eq!(err.to_string(), "duplicate resource root/task.a");
    }

    #[test]
    fn test_truncated_stream() {
        let mut tracker = Tracker::default();
        tracker.push(edges());
        assert!(tracker.finish().unwrap_err().to_string().contains("before the run finished"));
    }

    #[test]
    fn test_inconsistent_graph() {
        let mut tracker = Tracker::default();
        tracker.push(Frame::Edges(vec![Edge::new("root/task.a", "root/task.b", EdgeKind::Dependency)]));
        tracker.push(Frame::Summary(Summary::default()));
        assert!(tracker.finish().is_err());
    }

    #[test]
    fn test_address_forms() {
        assert_eq!(Client::new("127.0.0.1:4774").unwrap().base().as_str(), "http://127.0.0.1:4774/");
        assert_eq!(Client::new("https://keel.example").unwrap().base().scheme(), "https");
        assert!(Client::new("ftp://keel.example").is_err());
    }
}
