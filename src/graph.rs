//! Knowledge-graph exploration.
//!
//! [`GraphController`] owns one book's [`GraphDataset`] and a weight
//! threshold. Nodes whose weight is strictly greater than the threshold are
//! visible. Links are never removed from the data: the renderable projection
//! handed to a [`RenderSurface`] simply omits links whose endpoints are
//! hidden or do not exist.
//!
//! Recomputing visibility is a single pass over the nodes and is safe to run
//! on every input event.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::models::{GraphDataset, GraphLink, GraphNode};
use crate::transport::{Backend, HttpBackend};

/// A drawing target for graph views. `fit` and `reset` carry no state of
/// their own in the controller; they are forwarded as-is.
pub trait RenderSurface {
    fn render(&mut self, view: &GraphView<'_>);
    /// Zoom so every rendered node is in frame.
    fn fit(&mut self);
    /// Return the camera to its initial position.
    fn reset(&mut self);
}

/// What a surface should draw.
#[derive(Debug, Serialize)]
pub struct GraphView<'a> {
    pub threshold: f64,
    pub nodes: Vec<&'a GraphNode>,
    pub links: Vec<&'a GraphLink>,
}

/// A node together with the nodes it links to.
#[derive(Debug, Serialize)]
pub struct NodeDetail<'a> {
    pub node: &'a GraphNode,
    pub neighbors: Vec<&'a GraphNode>,
}

#[derive(Debug, Clone)]
pub struct GraphController {
    book_id: Option<String>,
    dataset: GraphDataset,
    index: HashMap<String, usize>,
    threshold: f64,
    visible: Vec<bool>,
}

impl GraphController {
    pub fn new(dataset: GraphDataset) -> Self {
        let mut index = HashMap::with_capacity(dataset.nodes.len());
        for (i, node) in dataset.nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(i);
        }
        let mut controller = Self {
            book_id: None,
            visible: vec![false; dataset.nodes.len()],
            dataset,
            index,
            threshold: 0.0,
        };
        controller.recompute();
        controller
    }

    /// Fetch a book's graph and build a controller for it.
    pub async fn load(backend: &dyn Backend, book_id: &str) -> ClientResult<Self> {
        let dataset = backend.book_graph(book_id).await?;
        let mut controller = Self::new(dataset);
        controller.book_id = Some(book_id.to_string());
        let dangling = controller.dangling_links();
        if dangling > 0 {
            tracing::debug!(book_id, dangling, "graph has links to unknown nodes");
        }
        Ok(controller)
    }

    pub fn book_id(&self) -> Option<&str> {
        self.book_id.as_deref()
    }

    pub fn dataset(&self) -> &GraphDataset {
        &self.dataset
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Change the weight threshold and recompute visibility.
    pub fn set_threshold(&mut self, threshold: f64) -> ClientResult<()> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ClientError::validation(format!(
                "threshold must be a non-negative number, got {}",
                threshold
            )));
        }
        self.threshold = threshold;
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        let t = self.threshold;
        for (flag, node) in self.visible.iter_mut().zip(&self.dataset.nodes) {
            *flag = node.weight() > t;
        }
    }

    pub fn visible_nodes(&self) -> Vec<&GraphNode> {
        self.dataset
            .nodes
            .iter()
            .zip(&self.visible)
            .filter(|(_, &v)| v)
            .map(|(n, _)| n)
            .collect()
    }

    /// All links, unfiltered by the threshold.
    pub fn visible_links(&self) -> &[GraphLink] {
        &self.dataset.links
    }

    fn is_visible(&self, id: &str) -> bool {
        self.index.get(id).is_some_and(|&i| self.visible[i])
    }

    /// Links whose two endpoints are both visible nodes.
    pub fn renderable_links(&self) -> Vec<&GraphLink> {
        self.dataset
            .links
            .iter()
            .filter(|l| self.is_visible(&l.source) && self.is_visible(&l.target))
            .collect()
    }

    /// Links with an endpoint that is not a node of this dataset.
    pub fn dangling_links(&self) -> usize {
        self.dataset
            .links
            .iter()
            .filter(|l| !self.index.contains_key(&l.source) || !self.index.contains_key(&l.target))
            .count()
    }

    pub fn view(&self) -> GraphView<'_> {
        GraphView {
            threshold: self.threshold,
            nodes: self.visible_nodes(),
            links: self.renderable_links(),
        }
    }

    /// The `k` heaviest nodes, heaviest first; equal weights keep dataset order.
    pub fn top_k(&self, k: usize) -> Vec<&GraphNode> {
        let mut ranked: Vec<&GraphNode> = self.dataset.nodes.iter().collect();
        ranked.sort_by(|a, b| b.weight().total_cmp(&a.weight()));
        ranked.truncate(k);
        ranked
    }

    pub fn node_detail(&self, id: &str) -> Option<NodeDetail<'_>> {
        let &i = self.index.get(id)?;
        let node = &self.dataset.nodes[i];
        let mut seen = vec![false; self.dataset.nodes.len()];
        let mut neighbors = Vec::new();
        for link in &self.dataset.links {
            let other = if link.source == node.id {
                &link.target
            } else if link.target == node.id {
                &link.source
            } else {
                continue;
            };
            if let Some(&j) = self.index.get(other.as_str()) {
                if j != i && !seen[j] {
                    seen[j] = true;
                    neighbors.push(&self.dataset.nodes[j]);
                }
            }
        }
        Some(NodeDetail { node, neighbors })
    }

    pub fn render_to(&self, surface: &mut dyn RenderSurface) {
        surface.render(&self.view());
    }

    pub fn fit(&self, surface: &mut dyn RenderSurface) {
        surface.fit();
    }

    pub fn reset(&self, surface: &mut dyn RenderSurface) {
        surface.reset();
    }
}

/// Plain-text surface used by the CLI.
pub struct TextSurface<W: Write> {
    out: W,
    list_limit: usize,
}

impl<W: Write> TextSurface<W> {
    pub fn new(out: W, list_limit: usize) -> Self {
        Self { out, list_limit }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RenderSurface for TextSurface<W> {
    fn render(&mut self, view: &GraphView<'_>) {
        let _ = writeln!(
            self.out,
            "{} nodes, {} links visible (weight > {})",
            view.nodes.len(),
            view.links.len(),
            view.threshold
        );
        for node in view.nodes.iter().take(self.list_limit) {
            let _ = writeln!(self.out, "  {:<32} {:>6.1}", node.id, node.weight());
        }
        if view.nodes.len() > self.list_limit {
            let _ = writeln!(self.out, "  ... {} more", view.nodes.len() - self.list_limit);
        }
    }

    fn fit(&mut self) {
        let _ = writeln!(self.out, "(view fitted to visible nodes)");
    }

    fn reset(&mut self) {
        let _ = writeln!(self.out, "(view reset)");
    }
}

fn print_top(controller: &GraphController, k: usize) {
    println!("--- Top {} by weight ---", k);
    for (rank, node) in controller.top_k(k).iter().enumerate() {
        println!("{:>3}. {} ({})", rank + 1, node.id, node.weight());
    }
}

fn print_detail(detail: &NodeDetail<'_>) {
    println!("--- Node ---");
    println!("id:          {}", detail.node.id);
    if let Some(kind) = &detail.node.kind {
        println!("type:        {}", kind);
    }
    println!("weight:      {}", detail.node.weight());
    if let Some(desc) = &detail.node.description {
        println!("description: {}", desc);
    }
    println!("neighbors ({}):", detail.neighbors.len());
    for n in &detail.neighbors {
        println!("  {}", n.id);
    }
}

/// Options for `bka graph`.
#[derive(Debug, Clone, Default)]
pub struct GraphOptions {
    pub min_weight: Option<f64>,
    pub top: Option<usize>,
    pub node: Option<String>,
    pub json: bool,
    pub interactive: bool,
}

/// CLI entry point for `bka graph`.
pub async fn run_graph(config: &Config, book_id: &str, opts: GraphOptions) -> Result<()> {
    let backend = HttpBackend::from_config(&config.backend)?;
    let mut controller = GraphController::load(&backend, book_id).await?;
    if let Some(t) = opts.min_weight {
        controller.set_threshold(t)?;
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&controller.view())?);
        return Ok(());
    }

    if let Some(id) = &opts.node {
        match controller.node_detail(id) {
            Some(detail) => print_detail(&detail),
            None => anyhow::bail!("node not found: {}", id),
        }
        return Ok(());
    }

    let top = opts.top.unwrap_or(config.graph.top_k);
    let mut surface = TextSurface::new(std::io::stdout(), top.max(20));
    println!(
        "Book {}: {} nodes, {} links",
        book_id,
        controller.dataset().nodes.len(),
        controller.dataset().links.len()
    );
    controller.render_to(&mut surface);
    print_top(&controller, top);

    if opts.interactive {
        explore(&mut controller, &mut surface, config).await?;
    }
    Ok(())
}

/// `top` with no argument uses `default`.
fn parse_top_k(arg: &str, default: usize) -> Result<usize, String> {
    if arg.is_empty() {
        return Ok(default);
    }
    arg.parse().map_err(|_| format!("invalid k: {}", arg))
}

/// Line-driven explorer: a number sets the threshold, plus `fit`, `reset`,
/// `top [k]`, `node <id>`, `quit`.
async fn explore<W: Write>(
    controller: &mut GraphController,
    surface: &mut TextSurface<W>,
    config: &Config,
) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    println!(
        "Enter a weight threshold (0-{}), or: fit, reset, top [k], node <id>, quit",
        config.graph.max_threshold
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        match cmd {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "fit" => controller.fit(surface),
            "reset" => controller.reset(surface),
            "top" => match parse_top_k(arg, config.graph.top_k) {
                Ok(k) => print_top(controller, k),
                Err(msg) => println!("{}", msg),
            },
            "node" => match controller.node_detail(arg) {
                Some(detail) => print_detail(&detail),
                None => println!("node not found: {}", arg),
            },
            other => match other.parse::<f64>() {
                Ok(t) if t <= config.graph.max_threshold => match controller.set_threshold(t) {
                    Ok(()) => controller.render_to(surface),
                    Err(e) => println!("{}", e),
                },
                Ok(_) => println!("threshold must be at most {}", config.graph.max_threshold),
                Err(_) => println!("unknown command: {}", other),
            },
        }
    }
    Ok(())
}
