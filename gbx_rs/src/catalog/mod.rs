//! Layouts of the classes this crate understands.
//!
//! Every class is registered once in the `catalog!` invocation below with its
//! chunks and their flags. Chunks flagged `ignored` need no layout; they are
//! carried through as bytes.

use crate::{
    registry::{ChunkInfo, NodeClass},
    rw::ReaderWriter,
    GbxError, GbxErrorInner,
};

mod crystal;
mod game;
mod plug;

pub use crystal::{Crystal, CrystalFace, CrystalGroup};
pub use game::{
    Block, CGameCtnBlockSkin, CGameCtnChallenge, CGameCtnChallengeParameters,
    CGameCtnCollectorList, CGameCtnGhost, CGameGhost, CGameWaypointSpecialProperty, GhostSamples,
};
pub use plug::{
    CPlugCrystal, CPlugIndexBuffer, CPlugMaterialUserInst, CPlugSolid2Model, CPlugVertexStream,
    VertexUsage,
};

macro_rules! catalog {
    (
        $(
            $class_id:literal $class:ident {
                $(
                    $chunk_id:literal [ $( $flag:ident $( ( $arg:expr ) )? ),* ]
                    $( => $handler:expr )?
                ),* $(,)?
            }
        ),* $(,)?
    ) => {
        /// A node's data, one variant per registered class.
        #[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
        pub enum Class {
            $($class($class),)*
        }

        impl Class {
            /// Default instance of the class registered under `class_id`.
            pub(crate) fn new(class_id: u32) -> Option<Class> {
                match class_id {
                    $($class_id => Some(Class::$class($class::default())),)*
                    _ => None,
                }
            }

            pub fn class_id(&self) -> u32 {
                match self {
                    $(Class::$class(_) => $class_id,)*
                }
            }

            pub fn name(&self) -> &'static str {
                self.into()
            }

            pub fn chunks(&self) -> &'static [ChunkInfo] {
                match self {
                    $(Class::$class(_) => <$class as NodeClass>::CHUNKS,)*
                }
            }

            pub fn chunk(&self, chunk_id: u32) -> Option<&'static ChunkInfo> {
                self.chunks().iter().find(|chunk| chunk.id == chunk_id)
            }

            pub(crate) fn read_write_chunk(
                &mut self,
                chunk_id: u32,
                rw: &mut ReaderWriter<'_, '_>,
            ) -> Result<(), GbxError> {
                match self {
                    $(Class::$class(inner) => inner.read_write_chunk(chunk_id, rw),)*
                }
            }
        }

        $(
            impl NodeClass for $class {
                const CLASS_ID: u32 = $class_id;
                const NAME: &'static str = stringify!($class);
                const CHUNKS: &'static [ChunkInfo] = &[
                    $( ChunkInfo::new($chunk_id) $( .$flag( $( $arg )? ) )* ),*
                ];

                #[allow(unused_variables)]
                fn read_write_chunk(
                    &mut self,
                    chunk_id: u32,
                    rw: &mut ReaderWriter<'_, '_>,
                ) -> Result<(), GbxError> {
                    match chunk_id {
                        $($( $chunk_id => ($handler)(self, rw), )?)*
                        _ => Err(GbxErrorInner::UnrecoverableChunk {
                            chunk_id,
                            class_id: $class_id,
                        }
                        .into()),
                    }
                }

                #[allow(unreachable_patterns)]
                fn from_class(class: &Class) -> Option<&Self> {
                    match class {
                        Class::$class(inner) => Some(inner),
                        _ => None,
                    }
                }

                #[allow(unreachable_patterns)]
                fn from_class_mut(class: &mut Class) -> Option<&mut Self> {
                    match class {
                        Class::$class(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn into_class(self) -> Class {
                    Class::$class(self)
                }
            }
        )*
    };
}

catalog! {
    0x03043000 CGameCtnChallenge {
        0x03043002 [header, version(13)] => CGameCtnChallenge::map_info,
        0x03043003 [header, version(11)] => CGameCtnChallenge::common,
        0x03043004 [header] => CGameCtnChallenge::header_version,
        0x03043005 [header] => CGameCtnChallenge::xml,
        0x03043007 [header, version(1)] => CGameCtnChallenge::thumbnail,
        0x03043008 [header, version(1)] => CGameCtnChallenge::author,
        0x0304300d [] => CGameCtnChallenge::vehicle,
        0x03043011 [] => CGameCtnChallenge::parameters,
        0x0304301f [version(6)] => CGameCtnChallenge::blocks,
        0x03043022 [] => CGameCtnChallenge::unknown_22,
        0x03043024 [] => CGameCtnChallenge::music,
        0x03043025 [] => CGameCtnChallenge::coords,
        0x0304302a [] => CGameCtnChallenge::simple_editor,
        0x03043049 [ignored],
    },

    0x0305b000 CGameCtnChallengeParameters {
        0x0305b001 [] => CGameCtnChallengeParameters::tips,
        0x0305b004 [] => CGameCtnChallengeParameters::medal_times,
        0x0305b008 [] => CGameCtnChallengeParameters::stunt_info,
        0x0305b00a [skippable] => CGameCtnChallengeParameters::skippable_times,
        0x0305b00d [] => CGameCtnChallengeParameters::validation_ghost,
        0x0305b00e [skippable] => CGameCtnChallengeParameters::map_type,
    },

    0x0301b000 CGameCtnCollectorList {
        0x0301b000 [] => CGameCtnCollectorList::block_set,
    },

    0x03059000 CGameCtnBlockSkin {
        0x03059000 [] => CGameCtnBlockSkin::text,
        0x03059001 [] => CGameCtnBlockSkin::skin,
        0x03059002 [] => CGameCtnBlockSkin::skin_and_parent,
        0x03059003 [version(0)] => CGameCtnBlockSkin::secondary_skin,
    },

    0x2e009000 CGameWaypointSpecialProperty {
        0x2e009000 [version(2)] => CGameWaypointSpecialProperty::waypoint,
    },

    0x0303f000 CGameGhost {
        0x0303f005 [] => CGameGhost::samples,
    },

    0x03092000 CGameCtnGhost {
        0x0303f005 [] => CGameCtnGhost::ghost_samples,
        0x03092005 [skippable] => CGameCtnGhost::race_time,
        0x03092008 [skippable] => CGameCtnGhost::respawns,
        0x0309200a [skippable] => CGameCtnGhost::stunt_score,
    },

    0x090fd000 CPlugMaterialUserInst {
        0x090fd000 [version(3)] => CPlugMaterialUserInst::material,
        0x090fd001 [version(0)] => CPlugMaterialUserInst::hiding_group,
    },

    0x09056000 CPlugVertexStream {
        0x09056000 [version(1)] => CPlugVertexStream::stream,
    },

    0x09057000 CPlugIndexBuffer {
        0x09057001 [] => CPlugIndexBuffer::indices,
    },

    0x09003000 CPlugCrystal {
        0x09003003 [version(0)] => CPlugCrystal::crystal,
    },

    0x090bb000 CPlugSolid2Model {
        0x090bb000 [version(1)] => CPlugSolid2Model::model,
    },
}
