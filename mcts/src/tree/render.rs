use std::{fmt::Display, io::Write};

use graphviz_rust::{
  attributes::{EdgeAttributes, NodeAttributes},
  dot_structures::{Edge as GEdge, EdgeTy, Graph, Id, Node as GNode, NodeId as GNid, Stmt, Vertex},
  printer::{DotPrinter, PrinterContext},
};

use super::{NodeId, SearchTree};

fn render<A, O, P>(
  tree: &SearchTree<A, O, P>,
  node_id: NodeId,
  g: &mut Graph,
  theta: u32,
  depth: u32,
  count: &mut u32,
) -> GNid
where
  A: Ord + Clone + Display,
  O: Ord + Clone + Display,
{
  let id = *count;
  *count += 1;
  let node = tree.node(node_id);
  let leaf = depth == 0 || node.visits() <= theta;
  let mut attributes = vec![NodeAttributes::label(node_format(tree, node_id))];
  if node.is_decision() {
    attributes.push(NodeAttributes::shape(
      graphviz_rust::attributes::shape::plaintext,
    ));
  }
  let n = GNode::new(GNid(Id::Plain(format!("{id}")), None), attributes);
  g.add_stmt(Stmt::Node(n));

  if !leaf {
    for (edge, child) in tree.children(node_id) {
      let child_id = render(tree, child, g, theta, depth - 1, count);
      let e = GEdge {
        ty: EdgeTy::Pair(
          Vertex::N(GNid(Id::Plain(format!("{id}")), None)),
          Vertex::N(child_id),
        ),
        attributes: vec![EdgeAttributes::label(format!("\"{edge}\""))],
      };
      g.add_stmt(Stmt::Edge(e));
    }
  }
  GNid(Id::Plain(format!("{id}")), None)
}

/// Renders nodes up to `depth` edges below the root. Nodes visited at most
/// `theta` times are drawn but not expanded.
pub fn render_tree<A, O, P>(tree: &SearchTree<A, O, P>, theta: u32, depth: u32) -> Graph
where
  A: Ord + Clone + Display,
  O: Ord + Clone + Display,
{
  let mut g = Graph::DiGraph {
    id: Id::Plain("search".to_string()),
    strict: false,
    stmts: vec![],
  };
  let mut count = 0;
  render(tree, tree.root(), &mut g, theta, depth, &mut count);
  g
}

pub fn save<A, O, P, W: Write>(
  tree: &SearchTree<A, O, P>,
  mut out: W,
  theta: u32,
  depth: u32,
) -> std::io::Result<()>
where
  A: Ord + Clone + Display,
  O: Ord + Clone + Display,
{
  let g = render_tree(tree, theta, depth);
  let mut ctx = PrinterContext::default();
  write!(out, "{}", g.print(&mut ctx))
}

fn node_format<A, O, P>(tree: &SearchTree<A, O, P>, node_id: NodeId) -> String
where
  A: Ord + Clone,
  O: Ord + Clone,
{
  let node = tree.node(node_id);
  if node.is_decision() {
    format!(
      "\"N={} V={:.3} B={}\"",
      node.visits(),
      node.value(),
      node.particles().len()
    )
  } else {
    format!("\"N={} V={:.3}\"", node.visits(), node.value())
  }
}
