use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Numeric identity of a user, post, or any other entity tracked by the hot store.
pub type EntityId = u64;

/// Composite key for one relation edge: `subject` owns the hot-store set,
/// `object` is the member inside it.
///
/// Formats as `"subject:object"`, the layout used by the write-behind streams
/// (e.g. `"post-id:user-id"` for likes, `"user-id:post-id"` for favorites).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Owner of the relation set.
    pub subject: EntityId,
    /// Member of the relation set.
    pub object: EntityId,
}

impl EdgeKey {
    #[must_use]
    pub fn new(subject: EntityId, object: EntityId) -> Self {
        Self { subject, object }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.object)
    }
}

impl FromStr for EdgeKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (subject, object) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("edge key `{s}` is missing the `:` separator"))?;
        Ok(Self {
            subject: subject
                .parse()
                .with_context(|| format!("invalid subject id in edge key `{s}`"))?,
            object: object
                .parse()
                .with_context(|| format!("invalid object id in edge key `{s}`"))?,
        })
    }
}

/// Relation sets kept in the hot store and mirrored row-for-row in the
/// durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Users who liked a post. Subject: post, object: user.
    Like,
    /// Posts a user saved. Subject: user, object: post.
    Favorite,
    /// Users a user follows. Subject: follower, object: followed.
    Follow,
    /// Users a user has blocked. Subject: user, object: blocked user.
    Block,
}

impl RelationKind {
    pub const ALL: [Self; 4] = [Self::Like, Self::Favorite, Self::Follow, Self::Block];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Favorite => "favorite",
            Self::Follow => "follow",
            Self::Block => "block",
        }
    }

    /// Hot-store key prefix of the per-subject member set.
    #[must_use]
    pub fn set_prefix(self) -> &'static str {
        match self {
            Self::Like => "post:like:",
            Self::Favorite => "user:favorite:",
            Self::Follow => "user:follow:",
            Self::Block => "user:blacklist:",
        }
    }
}

/// Aggregate counters that the durable store recomputes and the hot store
/// serves from ranking sorted sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    /// Likes per post.
    LikeCount,
    /// Favorites per post.
    FavoriteCount,
    /// Comments per post.
    CommentCount,
}

impl AggregateKind {
    pub const ALL: [Self; 3] = [Self::LikeCount, Self::FavoriteCount, Self::CommentCount];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LikeCount => "like_count",
            Self::FavoriteCount => "favorite_count",
            Self::CommentCount => "comment_count",
        }
    }

    /// Hot-store sorted set holding `entity id -> count` for ranking.
    #[must_use]
    pub fn ranking_key(self) -> &'static str {
        match self {
            Self::LikeCount => "post:ranking:likes",
            Self::FavoriteCount => "post:ranking:favorites",
            Self::CommentCount => "post:ranking:comments",
        }
    }
}

/// Which side wins when the two stores disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// The hot store is the source of truth; the durable copy is repaired.
    Hot,
    /// The durable store is the source of truth; the hot copy is overwritten.
    Durable,
}

/// A class of data audited by the reconciler.
///
/// Serialized as its snake-case name (`"like"`, `"comment_count"`, ...) so it
/// can be listed directly in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataClass {
    Relation(RelationKind),
    Aggregate(AggregateKind),
}

impl DataClass {
    /// Every data class, relation sets first.
    #[must_use]
    pub fn all() -> Vec<Self> {
        RelationKind::ALL
            .into_iter()
            .map(Self::Relation)
            .chain(AggregateKind::ALL.into_iter().map(Self::Aggregate))
            .collect()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relation(kind) => kind.as_str(),
            Self::Aggregate(kind) => kind.as_str(),
        }
    }

    /// Relation sets are hot-authoritative during the retention window;
    /// aggregate counters are recomputed from cold storage.
    #[must_use]
    pub fn authority(self) -> Authority {
        match self {
            Self::Relation(_) => Authority::Hot,
            Self::Aggregate(_) => Authority::Durable,
        }
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| anyhow!("unknown data class `{s}`"))
    }
}

impl TryFrom<String> for DataClass {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataClass> for String {
    fn from(class: DataClass) -> Self {
        class.as_str().to_string()
    }
}
