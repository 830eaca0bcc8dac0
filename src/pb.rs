//! Wire messages exchanged between nodes.

use std::collections::HashMap;

#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Identity {
    #[prost(int32, tag = "1")]
    pub magic: i32,
    #[prost(int32, tag = "2")]
    pub id: i32,
    #[prost(int64, tag = "3")]
    pub epoch: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Digest {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(int32, tag = "2")]
    pub generation: i32,
    #[prost(int32, tag = "3")]
    pub max_version: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndpointState {
    #[prost(int32, tag = "1")]
    pub generation: i32,
    #[prost(int32, tag = "2")]
    pub version: i32,
    #[prost(int32, tag = "3")]
    pub node_id: i32,
    #[prost(bool, tag = "4")]
    pub has_token: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Syn {
    #[prost(string, tag = "1")]
    pub cluster_id: String,
    #[prost(message, repeated, tag = "2")]
    pub digests: Vec<Digest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {
    #[prost(message, repeated, tag = "1")]
    pub digests: Vec<Digest>,
    #[prost(map = "string, message", tag = "2")]
    pub states: HashMap<String, EndpointState>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack2 {
    #[prost(map = "string, message", tag = "1")]
    pub states: HashMap<String, EndpointState>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct View {
    #[prost(int32, repeated, tag = "1")]
    pub members: Vec<i32>,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(bool, tag = "3")]
    pub stable: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(message, optional, tag = "1")]
    pub sender: Option<Identity>,
    #[prost(message, optional, tag = "2")]
    pub view: Option<View>,
    #[prost(uint64, tag = "3")]
    pub view_number: u64,
    #[prost(int32, repeated, tag = "4")]
    pub msg_links: Vec<i32>,
    #[prost(int32, optional, tag = "5")]
    pub candidate: Option<i32>,
    #[prost(bool, tag = "6")]
    pub preferred_leader: bool,
    #[prost(string, optional, tag = "7")]
    pub test_interface: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub cluster_id: String,
    #[prost(message, optional, tag = "2")]
    pub sender: Option<Identity>,
    #[prost(string, tag = "3")]
    pub sender_addr: String,
    #[prost(uint64, tag = "4")]
    pub sequence: u64,
    #[prost(oneof = "envelope::Action", tags = "5, 6, 7, 8")]
    pub action: Option<envelope::Action>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Action {
        #[prost(message, tag = "5")]
        Syn(super::Syn),
        #[prost(message, tag = "6")]
        Ack(super::Ack),
        #[prost(message, tag = "7")]
        Ack2(super::Ack2),
        #[prost(message, tag = "8")]
        Heartbeat(super::Heartbeat),
    }
}
