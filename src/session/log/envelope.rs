/// What a producer appends to the log for every command.
///
/// `write_index` is the producer's own counter and is unrelated to the
/// index the log assigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEnvelope {
    pub session_id: SessionId,
    pub primitive_name: PrimitiveName,
    pub write_index: WriteIndex,
    pub operation: OperationId,
    pub payload: Vec<u8>,
}

impl LogEnvelope {
    pub fn encode(&self, codec: Codec) -> Result<Vec<u8>> {
        codec.encode(self)
    }

    pub fn decode(codec: Codec, bytes: &[u8]) -> Result<Self> {
        codec.decode(bytes)
    }
}
