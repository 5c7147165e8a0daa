use num_traits::PrimInt;

pub trait BitManipulation {
    fn set_bit(self, index: usize) -> Self;
    fn clear_bit(self, index: usize) -> Self;
    fn check_bit(self, index: usize) -> bool;
    fn eval_bit(self, index: usize, val: bool) -> Self;
    fn toggle_bit(self, index: usize) -> Self;
    fn field(self, shift: usize, width: usize) -> Self;
}

impl<T: PrimInt> BitManipulation for T {
    fn set_bit(self, index: usize) -> Self {
        self | (T::one() << index)
    }

    fn clear_bit(self, index: usize) -> Self {
        self & !(T::one() << index)
    }

    fn check_bit(self, index: usize) -> bool {
        (self & (T::one() << index)) != T::zero()
    }

    fn eval_bit(self, index: usize, val: bool) -> Self {
        if val {
            self.set_bit(index)
        } else {
            self.clear_bit(index)
        }
    }

    fn toggle_bit(self, index: usize) -> Self {
        self.eval_bit(index, !self.check_bit(index))
    }

    // extracts `width` bits starting at `shift`
    fn field(self, shift: usize, width: usize) -> Self {
        let mask = (T::one() << width) - T::one();
        (self >> shift) & mask
    }
}
