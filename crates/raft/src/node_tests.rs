use super::*;
use crate::log::MemLogStore;
use crate::rpc::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
use crate::transport::TransportError;
use async_trait::async_trait;
use std::sync::Mutex as StdMutex;

fn node_id(s: &str) -> NodeId {
    NodeId::new(s)
}

/// A transport with no peers reachable; used to exercise the single-node
/// and vote-rejection paths without a real network.
struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn request_vote(&self, peer: &NodeId, _req: RequestVoteRequest) -> Result<RequestVoteResponse, TransportError> {
        Err(TransportError::Unreachable(peer.clone(), "no network in tests".into()))
    }
    async fn append_entries(&self, peer: &NodeId, _req: AppendEntriesRequest) -> Result<AppendEntriesResponse, TransportError> {
        Err(TransportError::Unreachable(peer.clone(), "no network in tests".into()))
    }
}

/// Routes RPCs directly to another in-process `RaftNode`, for small
/// multi-node scenarios within a single test process.
struct LoopbackTransport {
    peers: StdMutex<HashMap<NodeId, Arc<RaftNode>>>,
}

impl LoopbackTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self { peers: StdMutex::new(HashMap::new()) })
    }

    fn register(&self, id: NodeId, node: Arc<RaftNode>) {
        self.peers.lock().unwrap().insert(id, node);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn request_vote(&self, peer: &NodeId, req: RequestVoteRequest) -> Result<RequestVoteResponse, TransportError> {
        let node = self.peers.lock().unwrap().get(peer).cloned();
        match node {
            Some(node) => Ok(node.handle_request_vote(req)),
            None => Err(TransportError::Unreachable(peer.clone(), "unknown peer".into())),
        }
    }

    async fn append_entries(&self, peer: &NodeId, req: AppendEntriesRequest) -> Result<AppendEntriesResponse, TransportError> {
        let node = self.peers.lock().unwrap().get(peer).cloned();
        match node {
            Some(node) => node
                .handle_append_entries(req)
                .map_err(|e| TransportError::Unreachable(peer.clone(), e.to_string())),
            None => Err(TransportError::Unreachable(peer.clone(), "unknown peer".into())),
        }
    }
}

#[tokio::test]
async fn single_node_cluster_elects_itself_leader_with_no_peers() {
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![]), Box::new(MemLogStore::new()), Arc::new(NullTransport));
    assert_eq!(node.role(), Role::Follower);
    node.tick(Instant::now() + Duration::from_secs(1)).await;
    assert_eq!(node.role(), Role::Leader);
}

#[tokio::test]
async fn follower_grants_vote_to_up_to_date_candidate() {
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![node_id("n2")]), Box::new(MemLogStore::new()), Arc::new(NullTransport));
    let resp = node.handle_request_vote(RequestVoteRequest {
        term: 1,
        candidate_id: node_id("n2"),
        last_log_index: 0,
        last_log_term: 0,
    });
    assert!(resp.vote_granted);
    assert_eq!(resp.term, 1);
}

#[tokio::test]
async fn follower_rejects_vote_for_stale_term() {
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![]), Box::new(MemLogStore::new()), Arc::new(NullTransport));
    node.handle_request_vote(RequestVoteRequest { term: 5, candidate_id: node_id("n2"), last_log_index: 0, last_log_term: 0 });
    let resp = node.handle_request_vote(RequestVoteRequest { term: 3, candidate_id: node_id("n3"), last_log_index: 0, last_log_term: 0 });
    assert!(!resp.vote_granted);
    assert_eq!(resp.term, 5);
}

#[tokio::test]
async fn follower_grants_only_one_vote_per_term() {
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![]), Box::new(MemLogStore::new()), Arc::new(NullTransport));
    let first = node.handle_request_vote(RequestVoteRequest { term: 1, candidate_id: node_id("n2"), last_log_index: 0, last_log_term: 0 });
    let second = node.handle_request_vote(RequestVoteRequest { term: 1, candidate_id: node_id("n3"), last_log_index: 0, last_log_term: 0 });
    assert!(first.vote_granted);
    assert!(!second.vote_granted);
}

#[tokio::test]
async fn non_leader_rejects_propose_with_leader_hint() {
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![node_id("n2")]), Box::new(MemLogStore::new()), Arc::new(NullTransport));
    let err = node.propose(vec![1, 2, 3]).unwrap_err();
    assert!(matches!(err, RaftError::NotLeader(None)));
}

#[tokio::test]
async fn leader_appends_and_commits_with_majority_ack() {
    let transport = LoopbackTransport::new();

    let leader = Arc::new(RaftNode::new(
        RaftConfig::new(node_id("leader"), vec![node_id("f1"), node_id("f2")]),
        Box::new(MemLogStore::new()),
        transport.clone(),
    ));
    let f1 = Arc::new(RaftNode::new(
        RaftConfig::new(node_id("f1"), vec![node_id("leader"), node_id("f2")]),
        Box::new(MemLogStore::new()),
        transport.clone(),
    ));
    let f2 = Arc::new(RaftNode::new(
        RaftConfig::new(node_id("f2"), vec![node_id("leader"), node_id("f1")]),
        Box::new(MemLogStore::new()),
        transport.clone(),
    ));
    transport.register(node_id("leader"), leader.clone());
    transport.register(node_id("f1"), f1.clone());
    transport.register(node_id("f2"), f2.clone());

    // Force a leader by running the election path directly.
    leader.tick(Instant::now() + Duration::from_secs(10)).await;
    assert_eq!(leader.role(), Role::Leader);

    let (index, term) = leader.propose(b"hello".to_vec()).unwrap();
    assert_eq!(index, 1);

    leader.replicate_once().await;

    assert_eq!(leader.commit_index(), 1);
    let committed = leader.drain_committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].term, term);

    assert_eq!(f1.commit_index(), 0, "followers learn the new commit index on the next heartbeat");
    leader.replicate_once().await;
    assert_eq!(f1.commit_index(), 1);
}

#[tokio::test]
async fn follower_truncates_conflicting_suffix_on_append_entries() {
    let mut log = MemLogStore::new();
    log.append(&[LogEntry { term: 1, index: 1, command_bytes: vec![] }, LogEntry { term: 1, index: 2, command_bytes: vec![] }]).unwrap();
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![]), Box::new(log), Arc::new(NullTransport));

    let resp = node
        .handle_append_entries(AppendEntriesRequest {
            term: 2,
            leader_id: node_id("leader"),
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![LogEntry { term: 2, index: 2, command_bytes: vec![9] }],
            leader_commit: 0,
        })
        .unwrap();

    assert!(resp.success);
}

#[tokio::test]
async fn append_entries_rejects_when_prev_log_term_mismatches() {
    let mut log = MemLogStore::new();
    log.append(&[LogEntry { term: 1, index: 1, command_bytes: vec![] }]).unwrap();
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![]), Box::new(log), Arc::new(NullTransport));

    let resp = node
        .handle_append_entries(AppendEntriesRequest {
            term: 1,
            leader_id: node_id("leader"),
            prev_log_index: 1,
            prev_log_term: 2,
            entries: vec![],
            leader_commit: 0,
        })
        .unwrap();

    assert!(!resp.success);
    assert_eq!(resp.conflict_index, Some(1));
}

#[tokio::test]
async fn bootstrap_from_snapshot_seeds_commit_and_applied_without_replaying_them() {
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![]), Box::new(MemLogStore::new()), Arc::new(NullTransport));
    node.bootstrap_from_snapshot(5);
    assert_eq!(node.commit_index(), 5);
    assert_eq!(node.last_applied(), 5);
    assert!(node.drain_committed().is_empty());
}

#[tokio::test]
async fn compact_log_then_last_applied_term_falls_back_to_included_term() {
    let mut log = MemLogStore::new();
    log.append(&[
        LogEntry { term: 1, index: 1, command_bytes: vec![] },
        LogEntry { term: 2, index: 2, command_bytes: vec![] },
    ])
    .unwrap();
    let node = RaftNode::new(RaftConfig::new(node_id("n1"), vec![]), Box::new(log), Arc::new(NullTransport));
    node.bootstrap_from_snapshot(2);
    node.compact_log(2, 2).unwrap();
    assert_eq!(node.last_applied_term(), 2);
}
